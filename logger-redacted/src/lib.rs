//! Logging for the claims batching engine
//!
//! Installs the global `tracing` subscriber and provides [`PiiRedactor`] for
//! masking insurer and provider contact details before they are logged.
//!
//! ```no_run
//! use logger_redacted::{init_logging, LogFormat, LoggerConfig, PiiRedactor};
//!
//! let config = LoggerConfig {
//!     format: LogFormat::Json,
//!     ..Default::default()
//! };
//! init_logging(&config).ok();
//!
//! let redactor = PiiRedactor::from_logger_config(&config);
//! tracing::info!(recipient = %redactor.redact("claims@healthfirst.example.com"), "Notice sent");
//! ```

pub mod config;
pub mod redactor;

pub use config::*;
pub use redactor::*;

use thiserror::Error;
use tracing_subscriber::{fmt, fmt::time::ChronoUtc, prelude::*, EnvFilter};

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("Failed to install subscriber: {0}")]
    Init(String),
}

/// Install the global subscriber. `RUST_LOG` wins over `config.level`.
pub fn init_logging(config: &LoggerConfig) -> Result<(), LoggerError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| LoggerError::Filter(e.to_string()))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match config.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_level(true),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .json(),
            )
            .try_init(),
    };

    result.map_err(|e| LoggerError::Init(e.to_string()))
}
