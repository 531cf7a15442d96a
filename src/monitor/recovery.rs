//! Self-healing hooks: Fly.io machine restarts and generic restart webhooks.

use std::time::Duration;

use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::models::RecoveryHook;

const HOOK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("FLY_API_TOKEN not configured")]
    MissingToken,

    #[error("no machines found for app '{0}'")]
    NoMachines(String),

    #[error("{context}: HTTP {status}")]
    Http { context: String, status: u16 },

    #[error("{context}: {message}")]
    Request { context: String, message: String },

    #[error("invalid hook: {0}")]
    InvalidHook(String),
}

#[derive(Debug, Deserialize)]
struct Machine {
    id: String,
    #[serde(default)]
    state: Option<String>,
}

pub struct RecoveryRunner {
    client: Client,
    fly_api_base: String,
    fly_token: Option<String>,
}

impl RecoveryRunner {
    pub fn new(client: Client, fly_api_base: impl Into<String>, fly_token: Option<String>) -> Self {
        Self {
            client,
            fly_api_base: fly_api_base.into().trim_end_matches('/').to_string(),
            fly_token: fly_token.filter(|t| !t.is_empty()),
        }
    }

    /// Run `hook` for `server`. Returns a short summary of what was done.
    pub async fn run(&self, server: &str, hook: &RecoveryHook, reason: &str) -> Result<String, RecoveryError> {
        tracing::info!(server = %server, reason = %reason, "recovery: running hook");
        match hook {
            RecoveryHook::FlyRestart { app } => self.restart_fly_app(app).await,
            RecoveryHook::Webhook { url, method } => self.call_webhook(server, url, method, reason).await,
        }
    }

    async fn restart_fly_app(&self, app: &str) -> Result<String, RecoveryError> {
        let token = self.fly_token.as_deref().ok_or(RecoveryError::MissingToken)?;

        let list_url = format!("{}/apps/{}/machines", self.fly_api_base, app);
        let context = format!("list machines of '{app}'");
        let response = self
            .client
            .get(&list_url)
            .bearer_auth(token)
            .timeout(HOOK_TIMEOUT)
            .send()
            .await
            .map_err(|e| request_error(&context, e))?;
        if !response.status().is_success() {
            return Err(RecoveryError::Http {
                context,
                status: response.status().as_u16(),
            });
        }
        let machines: Vec<Machine> = response.json().await.map_err(|e| request_error(&context, e))?;
        if machines.is_empty() {
            return Err(RecoveryError::NoMachines(app.to_string()));
        }

        for machine in &machines {
            let context = format!("restart machine {}", machine.id);
            tracing::debug!(app = %app, machine = %machine.id, state = ?machine.state, "recovery: restarting machine");
            let response = self
                .client
                .post(format!("{list_url}/{}/restart", machine.id))
                .bearer_auth(token)
                .timeout(HOOK_TIMEOUT)
                .send()
                .await
                .map_err(|e| request_error(&context, e))?;
            if !response.status().is_success() {
                return Err(RecoveryError::Http {
                    context,
                    status: response.status().as_u16(),
                });
            }
        }

        Ok(format!("restarted {} machine(s) of {app}", machines.len()))
    }

    async fn call_webhook(&self, server: &str, url: &str, method: &str, reason: &str) -> Result<String, RecoveryError> {
        let method = Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| RecoveryError::InvalidHook(format!("invalid HTTP method '{method}'")))?;
        let context = format!("restart webhook for '{server}'");
        let response = self
            .client
            .request(method, url)
            .timeout(HOOK_TIMEOUT)
            .json(&json!({ "server": server, "reason": reason }))
            .send()
            .await
            .map_err(|e| request_error(&context, e))?;
        if !response.status().is_success() {
            return Err(RecoveryError::Http {
                context,
                status: response.status().as_u16(),
            });
        }
        Ok(format!("restart webhook accepted ({})", response.status().as_u16()))
    }
}

fn request_error(context: &str, err: reqwest::Error) -> RecoveryError {
    RecoveryError::Request {
        context: context.to_string(),
        message: err.without_url().to_string(),
    }
}
