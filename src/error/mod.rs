use thiserror::Error;

/// Crate-level failures surfaced from constructors, loaders and parsers.
#[derive(Debug, Clone, Error)]
pub enum PollerError {
    /// Configuration errors
    #[error("Config Error: {0}")]
    ConfigError(String),

    /// A mode string that is neither "sync" nor "async"
    #[error("Invalid fetch mode: {0} (expected \"sync\" or \"async\")")]
    InvalidMode(String),

    /// The manager was built outside of a tokio runtime
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    /// The HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    /// Logger installation failed
    #[error("Logging Error: {0}")]
    LoggingError(String),
}

impl From<log::SetLoggerError> for PollerError {
    fn from(err: log::SetLoggerError) -> Self {
        PollerError::LoggingError(err.to_string())
    }
}

impl From<reqwest::Error> for PollerError {
    fn from(err: reqwest::Error) -> Self {
        PollerError::HttpClient(err.to_string())
    }
}

/// Outcome of a failed fetch. Never thrown across the public API: the
/// `Display` text is what lands in the cache entry and what subscribers see.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Connection refused, DNS failure, timeout and friends
    #[error("{0}")]
    Transport(String),

    /// Non-2xx response
    #[error("HTTP {status}: {reason}")]
    Status { status: u16, reason: String },

    /// Body was not valid JSON
    #[error("Invalid JSON: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn status(status: u16, reason: impl Into<String>) -> Self {
        FetchError::Status {
            status,
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return FetchError::Decode(err.to_string());
        }
        if let Some(status) = err.status() {
            return FetchError::status(
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown"),
            );
        }
        FetchError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_renders_code_and_reason() {
        let err = FetchError::status(404, "Not Found");
        assert_eq!(err.to_string(), "HTTP 404: Not Found");
    }

    #[test]
    fn transport_error_is_passed_through() {
        let err = FetchError::Transport("connection refused".to_string());
        assert_eq!(err.to_string(), "connection refused");
    }

    #[test]
    fn json_errors_become_decode_failures() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: FetchError = parse_err.into();
        assert!(matches!(err, FetchError::Decode(_)));
        assert!(err.to_string().starts_with("Invalid JSON: "));
    }

    #[test]
    fn invalid_mode_message_names_the_value() {
        let err = PollerError::InvalidMode("turbo".to_string());
        assert!(err.to_string().contains("turbo"));
    }
}
