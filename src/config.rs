//! Environment-driven configuration.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL, used in generated client configs.
    pub public_url: String,
    /// `None` runs the registry in memory.
    pub database_url: Option<String>,
    /// `None` disables auth (dev mode).
    pub api_key: Option<String>,
    pub cache_ttl: Duration,
    pub call_timeout: Duration,
    pub session_ttl: Duration,
    pub monitor_enabled: bool,
    pub health_check_interval: Duration,
    pub probe_timeout: Duration,
    pub recovery_cooldown: Duration,
    pub recovery_settle: Duration,
    pub alert_debounce: Duration,
    pub pushcut_webhook: Option<String>,
    pub fly_api_token: Option<String>,
    pub fly_api_base: String,
}

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_FLY_API_BASE: &str = "https://api.machines.dev/v1";

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            public_url: format!("http://localhost:{DEFAULT_PORT}"),
            database_url: None,
            api_key: None,
            cache_ttl: Duration::from_secs(60),
            call_timeout: Duration::from_secs(30),
            session_ttl: Duration::from_secs(3600),
            monitor_enabled: true,
            health_check_interval: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(10),
            recovery_cooldown: Duration::from_secs(600),
            recovery_settle: Duration::from_secs(45),
            alert_debounce: Duration::from_secs(3600),
            pushcut_webhook: None,
            fly_api_token: None,
            fly_api_base: DEFAULT_FLY_API_BASE.to_string(),
        }
    }
}

impl RouterConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let port = parse_or(&get, "PORT", defaults.port)?;
        let secs = |key: &str, default: Duration| -> anyhow::Result<Duration> {
            Ok(Duration::from_secs(parse_or(&get, key, default.as_secs())?))
        };

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port,
            public_url: get("PUBLIC_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| format!("http://localhost:{port}")),
            database_url: get("DATABASE_URL"),
            api_key: get("ROUTER_API_KEY"),
            cache_ttl: secs("CACHE_TTL_SECS", defaults.cache_ttl)?,
            call_timeout: secs("CALL_TIMEOUT_SECS", defaults.call_timeout)?,
            session_ttl: secs("SESSION_TTL_SECS", defaults.session_ttl)?,
            monitor_enabled: parse_bool_or(&get, "MONITOR_ENABLED", defaults.monitor_enabled)?,
            health_check_interval: secs("HEALTH_CHECK_INTERVAL_SECS", defaults.health_check_interval)?,
            probe_timeout: secs("HEALTH_PROBE_TIMEOUT_SECS", defaults.probe_timeout)?,
            recovery_cooldown: secs("RECOVERY_COOLDOWN_SECS", defaults.recovery_cooldown)?,
            recovery_settle: secs("RECOVERY_SETTLE_SECS", defaults.recovery_settle)?,
            alert_debounce: secs("ALERT_DEBOUNCE_SECS", defaults.alert_debounce)?,
            pushcut_webhook: get("PUSHCUT_WEBHOOK"),
            fly_api_token: get("FLY_API_TOKEN"),
            fly_api_base: get("FLY_API_BASE").unwrap_or(defaults.fly_api_base),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: '{raw}'")),
        None => Ok(default),
    }
}

fn parse_bool_or<G>(get: &G, key: &str, default: bool) -> anyhow::Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_ascii_lowercase()).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => anyhow::bail!("invalid value for {key}: '{other}'"),
    }
}
