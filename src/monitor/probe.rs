use std::time::{Duration, Instant};

use reqwest::Client;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Serialize;

use crate::models::HealthStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy { status: u16 },
    BadStatus { status: u16 },
    Timeout,
    ConnectionError(String),
}

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub outcome: ProbeOutcome,
    pub latency_ms: u64,
}

impl ProbeResult {
    pub fn is_healthy(&self) -> bool {
        matches!(self.outcome, ProbeOutcome::Healthy { .. })
    }

    pub fn http_status(&self) -> Option<u16> {
        match self.outcome {
            ProbeOutcome::Healthy { status } | ProbeOutcome::BadStatus { status } => Some(status),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<String> {
        match &self.outcome {
            ProbeOutcome::Healthy { .. } => None,
            ProbeOutcome::BadStatus { status } => Some(format!("HTTP {status}")),
            ProbeOutcome::Timeout => Some(format!("Timeout ({}ms)", self.latency_ms)),
            ProbeOutcome::ConnectionError(e) => Some(e.clone()),
        }
    }

    /// Registry view of this result.
    pub fn registry_status(&self) -> HealthStatus {
        match self.outcome {
            ProbeOutcome::Healthy { .. } => HealthStatus::Healthy,
            ProbeOutcome::BadStatus { .. } => HealthStatus::Degraded,
            ProbeOutcome::Timeout | ProbeOutcome::ConnectionError(_) => HealthStatus::Unreachable,
        }
    }
}

/// One-off probe result returned by the admin test endpoints.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ServerTestResult {
    pub name: String,
    pub url: String,
    pub status: HealthStatus,
    pub http_status: Option<u16>,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// `GET url`; healthy on 2xx or any of `accepted`. Only the status line is
/// read, so SSE endpoints do not hold the probe open.
pub async fn probe(client: &Client, url: &str, accepted: &[u16], timeout: Duration) -> ProbeResult {
    let started = Instant::now();
    let result = client
        .get(url)
        .timeout(timeout)
        .header(USER_AGENT, concat!("mcp-router-monitor/", env!("CARGO_PKG_VERSION")))
        .header(ACCEPT, "text/event-stream, application/json, */*")
        .send()
        .await;
    let latency_ms = started.elapsed().as_millis() as u64;

    let outcome = match result {
        Ok(response) => {
            let status = response.status();
            if status.is_success() || accepted.contains(&status.as_u16()) {
                ProbeOutcome::Healthy { status: status.as_u16() }
            } else {
                ProbeOutcome::BadStatus { status: status.as_u16() }
            }
        }
        Err(e) if e.is_timeout() => ProbeOutcome::Timeout,
        // The URL may carry `?key=`; keep it out of reports and alerts.
        Err(e) => ProbeOutcome::ConnectionError(e.without_url().to_string()),
    };

    ProbeResult { outcome, latency_ms }
}
