//! Client configuration loaded from environment variables.

use std::env;
use std::time::Duration;

use crate::errors::AppError;
use crate::models::Tone;

const DEFAULT_PORT: u16 = 8000;
const DEV_URL: &str = "http://localhost:8000";
const TUNNEL_HOST: &str = "loca.lt";

/// Timing of the health probe: aggressive while the server may be cold
/// starting, relaxed once it has answered.
#[derive(Debug, Clone)]
pub struct HealthPolicy {
    pub cold_start_interval: Duration,
    pub cold_start_timeout: Duration,
    pub cold_start_attempts: u32,
    pub steady_interval: Duration,
    pub steady_timeout: Duration,
    /// How long a sleeping server usually takes to wake up.
    pub wake_estimate: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            cold_start_interval: Duration::from_secs(2),
            cold_start_timeout: Duration::from_secs(8),
            cold_start_attempts: 30,
            steady_interval: Duration::from_secs(10),
            steady_timeout: Duration::from_secs(3),
            wake_estimate: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL without trailing slash.
    pub base_url: String,
    /// Send `bypass-tunnel-reminder` on every request.
    pub tunnel_bypass: bool,
    pub chat_timeout: Duration,
    pub tone: Tone,
    pub health: HealthPolicy,
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            tunnel_bypass: base_url.contains(TUNNEL_HOST),
            base_url,
            chat_timeout: Duration::from_secs(60),
            tone: Tone::default(),
            health: HealthPolicy::default(),
        }
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let mut config = Self::new(resolve_base_url(&lookup));
        if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
            return Err(AppError::Config(format!(
                "API URL must start with http:// or https:// (got '{}')",
                config.base_url
            )));
        }
        if let Some(tone) = lookup("QUE_MORFAMOS_TONE") {
            config.tone = tone.parse()?;
        }
        if let Some(secs) = lookup("QUE_MORFAMOS_CHAT_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            config.chat_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Explicit override, else the development default, else the same host on
/// the fixed backend port.
fn resolve_base_url(lookup: &impl Fn(&str) -> Option<String>) -> String {
    let explicit = ["QUE_MORFAMOS_API_URL", "QUE_MORFAMOS_BACKEND_URL"]
        .iter()
        .filter_map(|key| lookup(key))
        .find(|v| !v.trim().is_empty());
    if let Some(url) = explicit {
        return url.trim().to_string();
    }

    if lookup("QUE_MORFAMOS_ENV").as_deref() == Some("development") {
        return DEV_URL.to_string();
    }

    let host = lookup("QUE_MORFAMOS_HOST").unwrap_or_else(|| "localhost".to_string());
    format!("http://{host}:{DEFAULT_PORT}")
}
