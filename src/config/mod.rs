pub mod settings;

pub use settings::Config;

use crate::data::FetchMode;
use crate::error::PollerError;
use std::env;
use std::sync::Arc;

/// Loads the poller configuration as an `Arc<Config>`.
///
/// Unlike `Config::from_env`, values that are present but malformed are
/// reported as `PollerError::ConfigError` rather than replaced by defaults.
pub fn load_config() -> Result<Arc<Config>, PollerError> {
    dotenv::dotenv().ok(); // .env is optional

    if let Ok(raw) = env::var("POLLER_MODE") {
        raw.parse::<FetchMode>()
            .map_err(|e| PollerError::ConfigError(e.to_string()))?;
    }
    check_parsable::<f64>("POLLER_DEFAULT_FREQUENCY_SECS")?;
    check_parsable::<u64>("POLLER_MIN_INTERVAL_MS")?;
    check_parsable::<u64>("POLLER_REQUEST_TIMEOUT_SECS")?;
    check_parsable::<log::LevelFilter>("POLLER_LOG_LEVEL")?;

    let config = Config::from_env();
    validate(&config)?;

    Ok(Arc::new(config))
}

fn check_parsable<T: std::str::FromStr>(key: &str) -> Result<(), PollerError> {
    match env::var(key) {
        Ok(raw) if raw.parse::<T>().is_err() => Err(PollerError::ConfigError(format!(
            "{} has an invalid value: {:?}",
            key, raw
        ))),
        _ => Ok(()),
    }
}

pub fn validate(config: &Config) -> Result<(), PollerError> {
    if !config.default_frequency_secs.is_finite() || config.default_frequency_secs <= 0.0 {
        return Err(PollerError::ConfigError(
            "POLLER_DEFAULT_FREQUENCY_SECS must be a positive number".to_string(),
        ));
    }
    if config.request_timeout_secs == 0 {
        return Err(PollerError::ConfigError(
            "POLLER_REQUEST_TIMEOUT_SECS must be greater than zero".to_string(),
        ));
    }
    if config.user_agent.trim().is_empty() {
        return Err(PollerError::ConfigError(
            "POLLER_USER_AGENT cannot be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
        assert_eq!(config.mode, FetchMode::Sync);
        assert_eq!(config.min_interval_ms, 100);
        assert!(config.user_agent.starts_with("panel-poller/"));
    }

    #[test]
    fn rejects_non_positive_frequency() {
        let config = Config {
            default_frequency_secs: 0.0,
            ..Config::default()
        };
        assert!(matches!(validate(&config), Err(PollerError::ConfigError(_))));
    }

    #[test]
    fn rejects_zero_timeout() {
        let config = Config {
            request_timeout_secs: 0,
            ..Config::default()
        };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_blank_user_agent() {
        let config = Config {
            user_agent: "   ".to_string(),
            ..Config::default()
        };
        assert!(validate(&config).is_err());
    }
}
