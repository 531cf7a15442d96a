//! Audit logging for registry mutations and routing failures.
//!
//! Entries go through the registry store. Failures are logged but never
//! propagate: auditing must not fail the operation that triggered it.

use serde_json::Value;

use crate::models::NewAuditEntry;
use crate::registry::RegistryStore;

pub const ACTOR_ADMIN: &str = "admin";
pub const ACTOR_ROUTER: &str = "router";
pub const ACTOR_MONITOR: &str = "monitor";

/// Append an audit entry, fire-and-forget.
pub async fn record(store: &dyn RegistryStore, action: &str, details: Value, actor: &str) {
    let entry = NewAuditEntry {
        action: action.to_string(),
        details,
        actor: actor.to_string(),
    };
    if let Err(e) = store.append_audit(entry).await {
        tracing::warn!(action = %action, actor = %actor, "audit log insert failed: {}", e);
    }
}
