//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the entire application.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the kinds of errors that can end an acquisition run, from configuration issues to
//! camera and illumination failures.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type
//!   mismatches in the configuration file or environment overrides.
//! - **`Configuration`**: Semantic errors in values that parsed fine but are
//!   logically invalid (e.g. zero cycles, unknown log level).
//! - **`Io`**: File system errors, including creation of the save directory.
//! - **`Instrument`**: Any failure reported by a camera or illuminator adapter.
//!   These abort the run; there is no local retry.
//! - **`HardwareDisconnected`**: A view that was active at run start stopped
//!   reporting connected between cycles.
//! - **`FrameShapeMismatch`**: A frame did not match the `(height, width)` fixed by
//!   the first frame of the run.
//! - **`Storage`**: Failures inside a persistence container.
//!
//! Cancellation is not an error: an interrupted run finishes with
//! [`crate::acquisition::RunOutcome::Cancelled`].

use crate::hardware::View;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error("No active camera/illumination pair is connected")]
    NoActiveViews,

    #[error("Hardware for view {0} disconnected during the run")]
    HardwareDisconnected(View),

    #[error(
        "Frame from view {view} is {actual_height}x{actual_width}, expected {expected_height}x{expected_width}"
    )]
    FrameShapeMismatch {
        view: View,
        expected_height: usize,
        expected_width: usize,
        actual_height: usize,
        actual_width: usize,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error("Measurement worker failed: {0}")]
    Worker(String),

    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<DaqError>),
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}

impl DaqError {
    /// Wrap an adapter error, keeping the full context chain in the message.
    pub fn instrument(err: anyhow::Error) -> Self {
        DaqError::Instrument(format!("{err:#}"))
    }

    /// Wrap a persistence error, keeping the full context chain in the message.
    pub fn storage(err: anyhow::Error) -> Self {
        DaqError::Storage(format!("{err:#}"))
    }
}
