use std::time::Duration;

use anyhow::{Context, Result};

pub const PAYSTACK_INLINE_SCRIPT: &str = "https://js.paystack.co/v1/inline.js";

/// Client configuration. Every field can be overridden from the environment
/// (or a `.env` file) with the `HOSTELHUB_` variables read in [`ClientConfig::from_env`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base URL, e.g. `http://localhost:5000/api`
    pub api_url: String,
    /// Realtime endpoint, e.g. `ws://localhost:5000/realtime`
    pub socket_url: String,
    pub currency: String,
    /// Fallback key when the backend does not send one with the booking
    pub paystack_public_key: String,
    pub paystack_script_url: String,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub http_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000/api".into(),
            socket_url: "ws://localhost:5000/realtime".into(),
            currency: "NGN".into(),
            paystack_public_key: String::new(),
            paystack_script_url: PAYSTACK_INLINE_SCRIPT.into(),
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(1000),
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Load `.env` if present, then apply `HOSTELHUB_*` overrides on top of the defaults.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("HOSTELHUB_API_URL") {
            config.api_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("HOSTELHUB_SOCKET_URL") {
            config.socket_url = v;
        }
        if let Some(v) = lookup("HOSTELHUB_CURRENCY") {
            config.currency = v;
        }
        if let Some(v) = lookup("HOSTELHUB_PAYSTACK_KEY") {
            config.paystack_public_key = v;
        }
        if let Some(v) = lookup("HOSTELHUB_PAYSTACK_SCRIPT_URL") {
            config.paystack_script_url = v;
        }
        if let Some(v) = lookup("HOSTELHUB_RECONNECT_ATTEMPTS") {
            config.reconnect_attempts = v
                .parse()
                .with_context(|| format!("HOSTELHUB_RECONNECT_ATTEMPTS must be an integer, got '{}'", v))?;
        }
        if let Some(v) = lookup("HOSTELHUB_RECONNECT_DELAY_MS") {
            let ms: u64 = v
                .parse()
                .with_context(|| format!("HOSTELHUB_RECONNECT_DELAY_MS must be an integer, got '{}'", v))?;
            config.reconnect_delay = Duration::from_millis(ms);
        }
        if let Some(v) = lookup("HOSTELHUB_HTTP_TIMEOUT_SECS") {
            let secs: u64 = v
                .parse()
                .with_context(|| format!("HOSTELHUB_HTTP_TIMEOUT_SECS must be an integer, got '{}'", v))?;
            config.http_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}
