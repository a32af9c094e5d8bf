//! PDP client configuration.

use std::time::Duration;

use serde::Deserialize;

/// Default PDP base URL for local development setups.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8443/api/pdp";

/// Default bound on the total retry duration for first-decision acquisition,
/// in seconds.
pub const DEFAULT_BACKOFF_MAX_SECS: f64 = 5.0;

/// Configuration for connecting to a Policy Decision Point.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PdpConfig {
    /// Base URL of the PDP API (the decide endpoint is appended).
    pub base_url: String,

    /// Basic-auth key. No Authorization header is sent when absent.
    pub key: Option<String>,

    /// Basic-auth secret, paired with `key`.
    pub secret: Option<String>,

    /// Use the dummy always-PERMIT client instead of a remote PDP.
    /// Development and testing only.
    pub dummy: bool,

    /// TLS certificate verification toggle, passed through to the transport.
    pub verify: bool,

    /// Verbose logging toggle, consumed by the embedding application's
    /// subscriber setup.
    pub debug: bool,

    /// Bound on total retry duration when waiting for a subscription's first
    /// decision, in seconds.
    pub backoff_const_max_time: f64,
}

impl Default for PdpConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            key: None,
            secret: None,
            dummy: false,
            verify: true,
            debug: false,
            backoff_const_max_time: DEFAULT_BACKOFF_MAX_SECS,
        }
    }
}

impl PdpConfig {
    /// Read configuration from `PEPGATE_PDP_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("PEPGATE_PDP_URL") {
            if !url.is_empty() {
                config.base_url = url;
            }
        }
        if let Ok(key) = std::env::var("PEPGATE_PDP_KEY") {
            if !key.is_empty() {
                config.key = Some(key);
            }
        }
        if let Ok(secret) = std::env::var("PEPGATE_PDP_SECRET") {
            if !secret.is_empty() {
                config.secret = Some(secret);
            }
        }
        config.dummy = env_flag("PEPGATE_PDP_DUMMY");
        if std::env::var("PEPGATE_PDP_NO_VERIFY").is_ok() {
            config.verify = !env_flag("PEPGATE_PDP_NO_VERIFY");
        }
        config.debug = env_flag("PEPGATE_PDP_DEBUG");
        if let Ok(raw) = std::env::var("PEPGATE_PDP_BACKOFF_MAX_SECS") {
            if let Ok(secs) = raw.parse::<f64>() {
                config.backoff_const_max_time = secs;
            }
        }
        config
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_credentials(mut self, key: impl Into<String>, secret: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self.secret = Some(secret.into());
        self
    }

    pub fn with_dummy(mut self, dummy: bool) -> Self {
        self.dummy = dummy;
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_backoff_max(mut self, max: Duration) -> Self {
        self.backoff_const_max_time = max.as_secs_f64();
        self
    }

    /// The retry bound as a `Duration`.
    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_const_max_time.max(0.0))
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
