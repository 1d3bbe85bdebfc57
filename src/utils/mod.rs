// src/utils/mod.rs
use crate::error::PollerError;
use log::{info, LevelFilter};

pub fn setup_logging(level: LevelFilter) -> Result<(), PollerError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}] {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .level_for("reqwest", LevelFilter::Warn)
        .level_for("hyper", LevelFilter::Warn)
        // JSON lines go to stdout, so logs stay on stderr
        .chain(std::io::stderr())
        .apply()?;
    info!("Logging initialized at {}.", level);
    Ok(())
}

/// Captured test logger; honours `RUST_LOG`. Safe to call from every test.
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_logger_install_reports_logging_error() {
        // The first call may already fail if another test installed a logger.
        let _ = setup_logging(LevelFilter::Warn);
        let err = setup_logging(LevelFilter::Warn).unwrap_err();
        assert!(matches!(err, PollerError::LoggingError(_)));
    }
}
