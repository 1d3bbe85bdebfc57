use crate::data::FetchMode;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: FetchMode,
    pub default_frequency_secs: f64,
    pub min_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    pub log_level: log::LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: FetchMode::Sync,
            default_frequency_secs: 5.0,
            min_interval_ms: 100,
            request_timeout_secs: 30,
            user_agent: default_user_agent(),
            log_level: log::LevelFilter::Info,
        }
    }
}

fn default_user_agent() -> String {
    format!("panel-poller/{}", env!("CARGO_PKG_VERSION"))
}

impl Config {
    /// Reads every `POLLER_*` variable, falling back to the defaults for
    /// anything missing or unparsable. Use `config::load_config` when bad
    /// values should be rejected instead of silently defaulted.
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Config {
            mode: env::var("POLLER_MODE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.mode),
            default_frequency_secs: env::var("POLLER_DEFAULT_FREQUENCY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_frequency_secs),
            min_interval_ms: env::var("POLLER_MIN_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.min_interval_ms),
            request_timeout_secs: env::var("POLLER_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.request_timeout_secs),
            user_agent: env::var("POLLER_USER_AGENT").unwrap_or(defaults.user_agent),
            log_level: env::var("POLLER_LOG_LEVEL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.log_level),
        }
    }

    pub fn validate_and_log(&self) {
        log::info!("Poller Configuration Loaded: {:?}", self);
        if self.min_interval_ms == 0 {
            log::warn!("POLLER_MIN_INTERVAL_MS is 0; timers will fire as fast as the runtime allows.");
        }
    }
}
