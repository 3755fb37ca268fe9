//! Custom error types for the application.
//!
//! This module defines the primary error type, `GalileoError`, for the whole
//! crate. Using the `thiserror` crate, it provides a centralized and consistent
//! way to handle the kinds of errors that occur in a measurement session, from
//! configuration and file I/O to instrument bus failures and a plot worker that
//! stops answering.
//!
//! ## Error Hierarchy
//!
//! - **`Config`** / **`Configuration`**: loading errors from `figment`, and semantic
//!   errors found while validating the loaded settings.
//! - **`Io`** / **`Csv`** / **`LoggerLost`**: file, pipe and CSV writer failures.
//! - **`Instrument`** / **`IdentityMismatch`**: bus or parse failures inside a driver,
//!   and an `*IDN?` reply that does not name the expected model.
//! - **`UnknownVariable`**: a write to a sample key outside the declared schema.
//! - **`InvalidTransition`**: a run-state change the transition table forbids.
//! - **`Protocol`** / **`PlotChannelClosed`** / **`PlotProcess`**: plot worker failures.
//! - **`FeatureNotEnabled`**: functionality compiled out via cargo features.
//!
//! By using `#[from]`, `GalileoError` can be created from the underlying error
//! types with the `?` operator.

use crate::run_state::{RunState, RunTransition};
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, GalileoError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum GalileoError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error("Instrument '{device}' identified as '{reply}', expected '{expected}'")]
    IdentityMismatch {
        device: String,
        expected: String,
        reply: String,
    },

    #[error("Data logger lost after a failed background write")]
    LoggerLost,

    #[error("Variable '{0}' is not declared in the sample schema")]
    UnknownVariable(String),

    #[error("Cannot {transition} while {from}")]
    InvalidTransition {
        from: RunState,
        transition: RunTransition,
    },

    #[error("Plot protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("Plot channel closed")]
    PlotChannelClosed,

    #[error("Plot process error: {0}")]
    PlotProcess(String),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<GalileoError>),
}

impl From<figment::Error> for GalileoError {
    fn from(err: figment::Error) -> Self {
        GalileoError::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GalileoError::Instrument("SR830 timed out".to_string());
        assert_eq!(err.to_string(), "Instrument error: SR830 timed out");
    }

    #[test]
    fn test_transition_error_names_state() {
        let err = GalileoError::InvalidTransition {
            from: RunState::Stopped,
            transition: RunTransition::Pause,
        };
        assert_eq!(err.to_string(), "Cannot pause while stopped");
    }

    #[test]
    fn test_shutdown_failed_error() {
        let err = GalileoError::ShutdownFailed(vec![
            GalileoError::Instrument("lock-in timeout".into()),
            GalileoError::PlotProcess("killed".into()),
        ]);
        assert!(err.to_string().contains("Shutdown failed"));
    }
}
