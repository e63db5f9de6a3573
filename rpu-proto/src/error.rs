//! Errors raised while turning physical parameters into register values.

use thiserror::Error;

/// Validation failures detected before any register value is produced.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtoError {
    /// Numeric input outside the domain of the computation (e.g. a zero divisor).
    #[error("Domain error: {0}")]
    Domain(String),

    /// Output limits violate `0.0 <= low < high <= 1.0`.
    #[error("Invalid output limits: low={low}, high={high} (need 0.0 <= low < high <= 1.0)")]
    InvalidLimits {
        /// Requested lower limit
        low: f32,
        /// Requested upper limit
        high: f32,
    },
}

/// Result type for protocol-level conversions.
pub type ProtoResult<T> = Result<T, ProtoError>;
