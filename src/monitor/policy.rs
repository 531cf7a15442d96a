//! Pure state transitions for the health monitor.
//!
//! Everything here takes `now` explicitly so the cooldown and debounce windows
//! can be tested without a clock.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct HealthState {
    pub status: ServerStatus,
    pub last_check: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub last_alert_sent: Option<DateTime<Utc>>,
    pub last_recovery_attempt: Option<DateTime<Utc>>,
    pub recovery_attempts: u32,
}

impl HealthState {
    /// Servers are presumed up until a probe says otherwise.
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            status: ServerStatus::Up,
            last_check: now,
            consecutive_failures: 0,
            last_alert_sent: None,
            last_recovery_attempt: None,
            recovery_attempts: 0,
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == ServerStatus::Up
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PolicyConfig {
    pub recovery_cooldown: Duration,
    pub alert_debounce: Duration,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            recovery_cooldown: Duration::seconds(600),
            alert_debounce: Duration::seconds(3600),
        }
    }
}

/// Fold one probe result into the previous state.
pub fn apply_probe(prev: &HealthState, healthy: bool, now: DateTime<Utc>) -> HealthState {
    if healthy {
        HealthState {
            status: ServerStatus::Up,
            last_check: now,
            consecutive_failures: 0,
            recovery_attempts: 0,
            ..prev.clone()
        }
    } else {
        HealthState {
            status: ServerStatus::Down,
            last_check: now,
            consecutive_failures: prev.consecutive_failures.saturating_add(1),
            ..prev.clone()
        }
    }
}

fn elapsed_at_least(since: Option<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) -> bool {
    since.is_none_or(|t| now.signed_duration_since(t) >= window)
}

pub fn should_attempt_recovery(
    state: &HealthState,
    has_hook: bool,
    now: DateTime<Utc>,
    policy: &PolicyConfig,
) -> bool {
    has_hook
        && !state.is_up()
        && state.consecutive_failures >= 1
        && elapsed_at_least(state.last_recovery_attempt, now, policy.recovery_cooldown)
}

/// Count an attempt whether or not the hook succeeded.
pub fn record_recovery_attempt(state: &mut HealthState, now: DateTime<Utc>) {
    state.last_recovery_attempt = Some(now);
    state.recovery_attempts = state.recovery_attempts.saturating_add(1);
}

/// Apply the re-probe that follows a successful hook.
pub fn apply_recheck(state: &mut HealthState, healthy: bool) {
    if healthy {
        state.status = ServerStatus::Up;
        state.consecutive_failures = 0;
        state.recovery_attempts = 0;
    }
}

/// Decide whether `next` warrants a down alert, given the state before this cycle.
pub fn should_alert(
    prev: &HealthState,
    next: &HealthState,
    has_hook: bool,
    now: DateTime<Utc>,
    policy: &PolicyConfig,
) -> bool {
    if next.is_up() || next.consecutive_failures < 2 {
        return false;
    }
    // Self-healing servers get two restarts before anyone is paged.
    if has_hook && next.recovery_attempts < 2 {
        return false;
    }
    prev.is_up() || elapsed_at_least(prev.last_alert_sent, now, policy.alert_debounce)
}

pub fn is_recovered(prev: &HealthState, next: &HealthState) -> bool {
    next.is_up() && !prev.is_up() && prev.consecutive_failures >= 2
}
