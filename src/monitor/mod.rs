// Health monitor
//
// Periodically probes every enabled server that has a health path:
// - probe, then run the server's recovery hook when policy allows
// - wait for the restart to settle and re-probe
// - mirror the result into the registry
// - send grouped down/recovered/healed notifications

pub mod notify;
pub mod policy;
pub mod probe;
pub mod recovery;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::audit;
use crate::config::RouterConfig;
use crate::models::{join_url, with_key_param, ToolServerRecord};
use crate::registry::{Registry, RegistryError};

pub use notify::{LogNotifier, Notification, Notifier, NotifyError, PushcutNotifier};
pub use policy::{HealthState, PolicyConfig, ServerStatus};
pub use probe::{ProbeResult, ServerTestResult};
pub use recovery::{RecoveryError, RecoveryRunner};

pub const TITLE_DOWN: &str = "MCP Server Down";
pub const TITLE_RECOVERED: &str = "MCP Server Recovered";
pub const TITLE_HEALED: &str = "MCP Auto-Healed";

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub recovery_settle: Duration,
    pub policy: PolicyConfig,
}

impl MonitorSettings {
    pub fn from_config(config: &RouterConfig) -> Self {
        Self {
            interval: config.health_check_interval,
            probe_timeout: config.probe_timeout,
            recovery_settle: config.recovery_settle,
            policy: PolicyConfig {
                recovery_cooldown: to_chrono(config.recovery_cooldown),
                alert_debounce: to_chrono(config.alert_debounce),
            },
        }
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("server '{0}' has no recovery hook")]
    NoRecoveryHook(String),

    #[error("recovery failed: {0}")]
    Recovery(#[from] RecoveryError),
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ServerCheck {
    pub server: String,
    pub status: String,
    pub latency_ms: u64,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heal_error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct CycleSummary {
    pub total: usize,
    pub healthy: usize,
    pub down: usize,
    pub healed: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CycleReport {
    pub checked_at: DateTime<Utc>,
    pub results: Vec<ServerCheck>,
    pub summary: CycleSummary,
    pub alerts_sent: usize,
    pub recoveries_sent: usize,
}

struct ServerOutcome {
    state: HealthState,
    check: ServerCheck,
    alert: Option<String>,
    recovered: bool,
    healed: bool,
}

pub struct HealthMonitor {
    registry: Registry,
    client: Client,
    notifier: Arc<dyn Notifier>,
    recovery: RecoveryRunner,
    settings: MonitorSettings,
    states: RwLock<HashMap<String, HealthState>>,
    cycle_lock: Mutex<()>,
}

impl HealthMonitor {
    pub fn new(
        registry: Registry,
        client: Client,
        notifier: Arc<dyn Notifier>,
        recovery: RecoveryRunner,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            registry,
            client,
            notifier,
            recovery,
            settings,
            states: RwLock::new(HashMap::new()),
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Snapshot of all tracked states, keyed by server name.
    pub async fn states(&self) -> BTreeMap<String, HealthState> {
        self.states
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub async fn run_cycle(&self) -> CycleReport {
        self.run_cycle_at(Utc::now()).await
    }

    /// One full monitoring pass. Overlapping calls are serialized.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> CycleReport {
        let _guard = self.cycle_lock.lock().await;

        let targets: Vec<ToolServerRecord> = match self.registry.list(true).await {
            Ok(records) => records.into_iter().filter(|r| r.health_path.is_some()).collect(),
            Err(e) => {
                tracing::error!("monitor: cannot list servers: {}", e);
                return CycleReport {
                    checked_at: now,
                    results: Vec::new(),
                    summary: CycleSummary::default(),
                    alerts_sent: 0,
                    recoveries_sent: 0,
                };
            }
        };

        let previous = self.states.read().await.clone();
        let outcomes = join_all(targets.iter().map(|record| {
            let prev = previous
                .get(&record.name)
                .cloned()
                .unwrap_or_else(|| HealthState::initial(now));
            self.check_server(record, prev, now)
        }))
        .await;

        {
            let mut states = self.states.write().await;
            states.retain(|name, _| targets.iter().any(|t| &t.name == name));
            for outcome in &outcomes {
                states.insert(outcome.check.server.clone(), outcome.state.clone());
            }
        }

        let alerts: Vec<&str> = outcomes.iter().filter_map(|o| o.alert.as_deref()).collect();
        let recoveries: Vec<&str> = outcomes
            .iter()
            .filter(|o| o.recovered)
            .map(|o| o.check.server.as_str())
            .collect();
        let healed: Vec<&str> = outcomes
            .iter()
            .filter(|o| o.healed)
            .map(|o| o.check.server.as_str())
            .collect();

        if !alerts.is_empty() {
            self.send(Notification {
                title: TITLE_DOWN.to_string(),
                text: alerts.join("\n"),
                urgent: true,
            })
            .await;
        }
        if !recoveries.is_empty() {
            self.send(Notification {
                title: TITLE_RECOVERED.to_string(),
                text: format!("{} back online", recoveries.join(", ")),
                urgent: false,
            })
            .await;
        }
        if !healed.is_empty() && alerts.is_empty() {
            self.send(Notification {
                title: TITLE_HEALED.to_string(),
                text: format!("{} restarted successfully", healed.join(", ")),
                urgent: false,
            })
            .await;
        }

        let summary = CycleSummary {
            total: outcomes.len(),
            healthy: outcomes.iter().filter(|o| o.state.is_up()).count(),
            down: outcomes.iter().filter(|o| !o.state.is_up()).count(),
            healed: healed.len(),
        };
        if summary.down > 0 {
            tracing::warn!(total = summary.total, down = summary.down, healed = summary.healed, "monitor: cycle complete");
        } else {
            tracing::debug!(total = summary.total, "monitor: all servers healthy");
        }

        CycleReport {
            checked_at: now,
            alerts_sent: alerts.len(),
            recoveries_sent: recoveries.len(),
            results: outcomes.into_iter().map(|o| o.check).collect(),
            summary,
        }
    }

    async fn check_server(&self, record: &ToolServerRecord, prev: HealthState, now: DateTime<Utc>) -> ServerOutcome {
        let url = record.probe_url();
        let mut result = probe::probe(&self.client, &url, &record.accepted_statuses, self.settings.probe_timeout).await;
        let mut state = policy::apply_probe(&prev, result.is_healthy(), now);
        let mut check = ServerCheck {
            server: record.name.clone(),
            status: if result.is_healthy() { "UP" } else { "DOWN" }.to_string(),
            latency_ms: result.latency_ms,
            error: result.error(),
            healed: None,
            heal_error: None,
        };
        let mut healed = false;

        if let Some(hook) = &record.recovery {
            if policy::should_attempt_recovery(&state, true, now, &self.settings.policy) {
                policy::record_recovery_attempt(&mut state, now);
                let reason = result.error().unwrap_or_else(|| "health check failed".to_string());
                match self.recovery.run(&record.name, hook, &reason).await {
                    Ok(summary) => {
                        healed = true;
                        check.healed = Some(true);
                        audit::record(
                            self.registry.store(),
                            "auto_recovery",
                            json!({ "name": record.name, "reason": reason, "result": summary }),
                            audit::ACTOR_MONITOR,
                        )
                        .await;

                        if !self.settings.recovery_settle.is_zero() {
                            tokio::time::sleep(self.settings.recovery_settle).await;
                        }
                        let recheck =
                            probe::probe(&self.client, &url, &record.accepted_statuses, self.settings.probe_timeout).await;
                        policy::apply_recheck(&mut state, recheck.is_healthy());
                        if recheck.is_healthy() {
                            tracing::info!(server = %record.name, "monitor: healed successfully");
                            check.status = "UP (healed)".to_string();
                            check.error = None;
                        } else {
                            tracing::warn!(server = %record.name, "monitor: still down after restart");
                            check.status = "DOWN (heal attempted)".to_string();
                            check.heal_error = Some("still down after restart".to_string());
                            check.error = recheck.error();
                        }
                        check.latency_ms = recheck.latency_ms;
                        result = recheck;
                    }
                    Err(e) => {
                        tracing::warn!(server = %record.name, "monitor: heal failed: {}", e);
                        check.healed = Some(false);
                        check.heal_error = Some(e.to_string());
                    }
                }
            }
        }

        let has_hook = record.recovery.is_some();
        let alert = if policy::should_alert(&prev, &state, has_hook, now, &self.settings.policy) {
            state.last_alert_sent = Some(now);
            let error = check.error.as_deref().unwrap_or("unhealthy");
            Some(if has_hook {
                format!("{}: {} (heal failed {}x)", record.name, error, state.recovery_attempts)
            } else {
                format!("{}: {}", record.name, error)
            })
        } else {
            None
        };
        let recovered = policy::is_recovered(&prev, &state);

        if let Err(e) = self
            .registry
            .record_health(&record.name, result.registry_status(), now)
            .await
        {
            tracing::warn!(server = %record.name, "monitor: cannot mirror health status: {}", e);
        }

        ServerOutcome {
            state,
            check,
            alert,
            recovered,
            healed,
        }
    }

    async fn send(&self, notification: Notification) {
        if let Err(e) = self.notifier.notify(&notification).await {
            tracing::error!(title = %notification.title, "monitor: notification failed: {}", e);
        }
    }

    /// Run a server's recovery hook on demand.
    pub async fn heal(&self, name: &str) -> Result<String, MonitorError> {
        let record = self.registry.get(name).await?;
        let hook = record
            .recovery
            .as_ref()
            .ok_or_else(|| MonitorError::NoRecoveryHook(name.to_string()))?;

        let result = self.recovery.run(name, hook, "manual").await;
        if let Some(state) = self.states.write().await.get_mut(name) {
            state.last_recovery_attempt = Some(Utc::now());
        }

        let details = match &result {
            Ok(summary) => json!({ "name": name, "success": true, "result": summary }),
            Err(e) => json!({ "name": name, "success": false, "error": e.to_string() }),
        };
        audit::record(self.registry.store(), "manual_recovery", details, audit::ACTOR_ADMIN).await;
        Ok(result?)
    }

    /// Probe one server for the admin test endpoints. Updates the registry's
    /// health columns but leaves monitor alert state untouched.
    pub async fn test_server(&self, record: &ToolServerRecord) -> ServerTestResult {
        let display_url = match &record.health_path {
            Some(path) => join_url(&record.url, path),
            None => record.url.clone(),
        };
        let probe_url = with_key_param(&display_url, record.auth_key.as_deref());
        let result = probe::probe(&self.client, &probe_url, &record.accepted_statuses, self.settings.probe_timeout).await;

        let status = result.registry_status();
        if let Err(e) = self.registry.record_health(&record.name, status, Utc::now()).await {
            tracing::warn!(server = %record.name, "test: cannot record health status: {}", e);
        }

        ServerTestResult {
            name: record.name.clone(),
            url: display_url,
            status,
            http_status: result.http_status(),
            latency_ms: result.latency_ms,
            error: result.error(),
        }
    }
}

/// Run the monitor on its interval until `shutdown` fires.
pub fn spawn(monitor: Arc<HealthMonitor>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        // tokio::time::interval panics on a zero period.
        let period = monitor.settings().interval.max(Duration::from_secs(1));
        tracing::info!("monitor: started (interval={}s)", period.as_secs());

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("monitor: shutting down");
                    break;
                }
                _ = interval.tick() => {
                    monitor.run_cycle().await;
                }
            }
        }
    })
}
