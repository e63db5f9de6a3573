//! Error types for the feedback driver.

use rpu_proto::{ProtoError, RegisterIndex};
use thiserror::Error;

/// Opaque failure reported by the register-access layer.
///
/// The driver never inspects or retries these; they are handed back to the
/// caller as they came.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct DeviceError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DeviceError {
    /// Create a device error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying transport error.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors raised by the parameter store, reader, and stream aggregator.
///
/// Validation variants (`Domain`, `InvalidLimits`) are always raised before
/// any register is written.
#[derive(Error, Debug)]
pub enum FeedbackError {
    /// Numeric input outside the domain of the operation.
    #[error("Domain error: {0}")]
    Domain(String),

    /// Output limits violate `0.0 <= low < high <= 1.0`.
    #[error("Invalid output limits: low={low}, high={high}")]
    InvalidLimits {
        /// Requested lower limit
        low: f32,
        /// Requested upper limit
        high: f32,
    },

    /// Communication with the device failed.
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// The register may only be programmed before the control loop starts.
    #[error("Register {0} cannot be written while the feedback loop is running")]
    LoopRunning(RegisterIndex),

    /// A pixel batch did not contain the requested input channel.
    #[error("Pixel batch has no data for input channel {0}")]
    MissingChannel(u8),

    /// Configuration file could not be read, written, or parsed.
    #[error("Config error: {0}")]
    Config(String),
}

impl From<ProtoError> for FeedbackError {
    fn from(err: ProtoError) -> Self {
        match err {
            ProtoError::Domain(msg) => FeedbackError::Domain(msg),
            ProtoError::InvalidLimits { low, high } => FeedbackError::InvalidLimits { low, high },
        }
    }
}

/// Result type for feedback operations.
pub type FeedbackResult<T> = Result<T, FeedbackError>;
