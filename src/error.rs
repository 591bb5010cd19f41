//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of errors that can occur while talking to instruments and
//! running a sweep.
//!
//! ## Error Hierarchy
//!
//! - **`Validation`**: A value was outside the declared domain of an instrument
//!   property (strict range, discrete set, wrong type, unknown property, bad argument).
//! - **`Protocol`**: A reply from the instrument could not be parsed as expected.
//! - **`Device`**: The instrument reported a non-zero code on its error queue.
//!   Error-queue polling only logs these; callers that want a failure convert
//!   explicitly.
//! - **`Configuration`**: Semantic errors in sweep parameters or settings, such as a
//!   step larger than the range or a non-positive step.
//! - **`Config`**: Wraps errors from `figment` while loading configuration files.
//! - **`Transport`**: The underlying channel (VISA, mock) failed a write or query.
//! - **`Timeout`**: A polling loop gave up waiting for the instrument.
//! - **`Io`** / **`Storage`**: File-system problems while persisting results.
//! - **`FeatureNotEnabled`**: The requested functionality was not compiled in.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type of the crate.
#[derive(Error, Debug)]
pub enum DaqError {
    /// A value was rejected by a property validator or an argument check.
    #[error("Validation error on '{property}': {reason}")]
    Validation {
        /// Name of the property or argument being validated.
        property: String,
        /// Human readable explanation.
        reason: String,
    },

    /// An instrument reply could not be parsed.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Non-zero entry reported by the instrument error queue.
    #[error("Device error {code}: {message}")]
    Device {
        /// Instrument error code.
        code: i32,
        /// Instrument error message.
        message: String,
    },

    /// Invalid sweep parameters or settings.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Configuration file or environment could not be extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// The transport failed to deliver a command or receive a reply.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A polling loop exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// File or stream I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Result storage failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Functionality gated behind a disabled cargo feature.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl DaqError {
    /// Shorthand for building a [`DaqError::Validation`].
    pub fn validation(property: impl Into<String>, reason: impl Into<String>) -> Self {
        DaqError::Validation {
            property: property.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error came from a property or argument check.
    pub fn is_validation(&self) -> bool {
        matches!(self, DaqError::Validation { .. })
    }

    /// Whether this error came from an unparseable reply.
    pub fn is_protocol(&self) -> bool {
        matches!(self, DaqError::Protocol(_))
    }
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}
