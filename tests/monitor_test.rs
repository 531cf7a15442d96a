// Health monitor cycles against live downstream servers: alert debounce,
// recovery notices and webhook self-healing.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use common::*;
use mcp_router::models::{HealthStatus, RecoveryHook};
use mcp_router::monitor::{ServerStatus, TITLE_DOWN, TITLE_HEALED, TITLE_RECOVERED};
use mcp_router::registry::MemoryRegistryStore;
use mcp_router::state::AppState;

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn setup() -> (AppState, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let state = state_with_notifier(
        test_config(),
        Arc::new(MemoryRegistryStore::new()),
        notifier.clone(),
    );
    (state, notifier)
}

async fn add_monitored(state: &AppState, name: &str, url: &str, recovery: Option<RecoveryHook>) {
    let mut server = new_server(name, url, &["tool"]);
    server.health_path = Some("/health".to_string());
    server.recovery = recovery;
    state.registry.add(server).await.unwrap();
}

#[tokio::test]
async fn healthy_servers_produce_no_notifications() {
    let (url, _ds) = spawn_downstream().await;
    let (state, notifier) = setup();
    add_monitored(&state, "svc", &url, None).await;
    // Servers without a health path are skipped.
    state
        .registry
        .add(new_server("plain", &url, &["x"]))
        .await
        .unwrap();

    let report = state.monitor.run_cycle_at(t0()).await;
    assert_eq!(report.summary.total, 1);
    assert_eq!(report.summary.healthy, 1);
    assert_eq!(report.results[0].status, "UP");
    assert!(notifier.take().is_empty());

    let record = state.registry.get("svc").await.unwrap();
    assert_eq!(record.health_status, HealthStatus::Healthy);
    assert_eq!(record.last_health_check, Some(t0()));
}

#[tokio::test]
async fn down_alert_is_debounced_then_repeated() {
    let (url, ds) = spawn_downstream().await;
    ds.set_health(503);
    let (state, notifier) = setup();
    add_monitored(&state, "svc", &url, None).await;

    // First failure: no alert yet.
    let first = state.monitor.run_cycle_at(t0()).await;
    assert_eq!(first.results[0].status, "DOWN");
    assert_eq!(first.alerts_sent, 0);
    assert!(notifier.take().is_empty());

    // Second consecutive failure pages.
    let second = state.monitor.run_cycle_at(t0() + Duration::minutes(5)).await;
    assert_eq!(second.alerts_sent, 1);
    let sent = notifier.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].title, TITLE_DOWN);
    assert_eq!(sent[0].text, "svc: HTTP 503");
    assert!(sent[0].urgent);

    // Inside the debounce window: silent.
    let third = state.monitor.run_cycle_at(t0() + Duration::minutes(10)).await;
    assert_eq!(third.alerts_sent, 0);
    assert!(notifier.take().is_empty());

    // Window elapsed: alert again.
    let fourth = state.monitor.run_cycle_at(t0() + Duration::minutes(70)).await;
    assert_eq!(fourth.alerts_sent, 1);
    assert_eq!(notifier.take().len(), 1);

    let states = state.monitor.states().await;
    assert_eq!(states["svc"].status, ServerStatus::Down);
    assert_eq!(states["svc"].consecutive_failures, 4);
    assert_eq!(
        state.registry.get("svc").await.unwrap().health_status,
        HealthStatus::Degraded
    );
}

#[tokio::test]
async fn recovery_after_outage_is_announced() {
    let (url, ds) = spawn_downstream().await;
    ds.set_health(500);
    let (state, notifier) = setup();
    add_monitored(&state, "svc", &url, None).await;

    state.monitor.run_cycle_at(t0()).await;
    state.monitor.run_cycle_at(t0() + Duration::minutes(5)).await;
    notifier.take();

    ds.set_health(200);
    let report = state.monitor.run_cycle_at(t0() + Duration::minutes(10)).await;
    assert_eq!(report.recoveries_sent, 1);
    let sent = notifier.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].title, TITLE_RECOVERED);
    assert_eq!(sent[0].text, "svc back online");
    assert!(!sent[0].urgent);
}

#[tokio::test]
async fn webhook_hook_heals_on_first_failure() {
    let (url, ds) = spawn_downstream().await;
    ds.set_health(503);
    let (state, notifier) = setup();
    let hook = RecoveryHook::Webhook {
        url: format!("{url}/heal"),
        method: "POST".to_string(),
    };
    add_monitored(&state, "svc", &url, Some(hook)).await;

    let report = state.monitor.run_cycle_at(t0()).await;
    assert_eq!(ds.heal_calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.results[0].status, "UP (healed)");
    assert_eq!(report.results[0].healed, Some(true));
    assert_eq!(report.summary.healed, 1);
    assert_eq!(report.alerts_sent, 0);

    let sent = notifier.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].title, TITLE_HEALED);
    assert_eq!(sent[0].text, "svc restarted successfully");

    let audit = state.registry.audit_log(1).await.unwrap();
    assert_eq!(audit[0].action, "auto_recovery");
    assert_eq!(audit[0].actor, "monitor");
    assert_eq!(audit[0].details["name"], json!("svc"));

    let states = state.monitor.states().await;
    assert!(states["svc"].is_up());
    assert_eq!(states["svc"].last_recovery_attempt, Some(t0()));
}

#[tokio::test]
async fn failing_hook_respects_cooldown_and_pages_after_two_attempts() {
    let (url, ds) = spawn_downstream().await;
    ds.set_health(503);
    let dead = dead_url().await;
    let (state, notifier) = setup();
    let hook = RecoveryHook::Webhook {
        url: format!("{dead}/heal"),
        method: "POST".to_string(),
    };
    add_monitored(&state, "svc", &url, Some(hook)).await;

    let first = state.monitor.run_cycle_at(t0()).await;
    assert_eq!(first.results[0].healed, Some(false));

    // Inside the cooldown: no second attempt, and one attempt is not enough to page.
    let second = state.monitor.run_cycle_at(t0() + Duration::minutes(5)).await;
    assert_eq!(second.results[0].healed, None);
    assert_eq!(second.alerts_sent, 0);

    // Cooldown elapsed: second attempt fails, alert goes out.
    let third = state.monitor.run_cycle_at(t0() + Duration::minutes(11)).await;
    assert_eq!(third.results[0].healed, Some(false));
    assert_eq!(third.alerts_sent, 1);
    let sent = notifier.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].text, "svc: HTTP 503 (heal failed 2x)");
}

#[tokio::test]
async fn down_alert_never_echoes_auth_key() {
    let dead = dead_url().await;
    let (state, notifier) = setup();
    let mut server = new_server("sec", &dead, &["tool"]);
    server.health_path = Some("/health".to_string());
    server.auth_key = Some("TOPSECRET".to_string());
    state.registry.add(server).await.unwrap();

    let first = state.monitor.run_cycle_at(t0()).await;
    assert_eq!(first.results[0].status, "DOWN");
    state.monitor.run_cycle_at(t0() + Duration::minutes(5)).await;

    let sent = notifier.take();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.starts_with("sec: "));
    assert!(!sent[0].text.contains("TOPSECRET"), "{}", sent[0].text);
    let report = serde_json::to_string(&first).unwrap();
    assert!(!report.contains("TOPSECRET"), "{report}");
}

#[tokio::test]
async fn removed_servers_are_forgotten() {
    let (url, ds) = spawn_downstream().await;
    ds.set_health(503);
    let (state, _notifier) = setup();
    add_monitored(&state, "svc", &url, None).await;

    state.monitor.run_cycle_at(t0()).await;
    assert!(state.monitor.states().await.contains_key("svc"));

    state.registry.remove("svc").await.unwrap();
    let report = state.monitor.run_cycle_at(t0() + Duration::minutes(5)).await;
    assert_eq!(report.summary.total, 0);
    assert!(state.monitor.states().await.is_empty());
}
