//! Fixed-point to physical scaling of the RPU lock-in accumulator.
//!
//! The RPU receives raw accumulator sums from the lock-in. To turn them into
//! the same units the host-side lock-in reports, it multiplies by a single
//! factor made of three parts:
//!
//! - `1 / ACCUMULATOR_MAX` - fixed-point normalization of the accumulator
//! - `1 / samples_per_pixel` - average over the ADC samples in one pixel
//! - `1 / window_length` - turn the NSW-long sliding sum into a sliding average

use crate::error::{ProtoError, ProtoResult};

/// Full-scale value of the lock-in accumulator as seen by the RPU.
pub const ACCUMULATOR_MAX: u64 = 0xFFEE_801F;

/// Compute the scale factor programmed into the scale register.
///
/// # Errors
///
/// Returns [`ProtoError::Domain`] if any of the inputs is zero.
///
/// # Example
///
/// ```
/// use rpu_proto::scale::{compute_scale, ACCUMULATOR_MAX};
///
/// let scale = compute_scale(ACCUMULATOR_MAX, 1000, 16)?;
/// assert!(scale > 0.0);
/// # Ok::<(), rpu_proto::ProtoError>(())
/// ```
pub fn compute_scale(
    accumulator_max: u64,
    samples_per_pixel: u64,
    window_length: u64,
) -> ProtoResult<f64> {
    if accumulator_max == 0 {
        return Err(ProtoError::Domain(
            "accumulator maximum must be non-zero".to_string(),
        ));
    }
    if samples_per_pixel == 0 {
        return Err(ProtoError::Domain(
            "samples per pixel must be non-zero".to_string(),
        ));
    }
    if window_length == 0 {
        return Err(ProtoError::Domain(
            "sliding window length must be non-zero".to_string(),
        ));
    }

    let scale_acc = 1.0 / accumulator_max as f64;
    let scale_spp = 1.0 / samples_per_pixel as f64;
    let scale_slw = 1.0 / window_length as f64;
    Ok(scale_acc * scale_spp * scale_slw)
}
