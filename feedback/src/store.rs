//! Feedback parameter store: the host side of the RPU configuration.
//!
//! The store is the only component that writes parameter registers. It turns
//! configuration intent (a window length, output limits, PID gains) into
//! typed register values and issues the writes.
//!
//! # Lifecycle
//!
//! ```text
//!   set_scale ─┐
//!   set_limits ├─ before the loop starts (Configuring)
//!   set_pid   ─┘
//!        │
//!   mark_loop_started()
//!        │
//!   set_pid / set_scanner ── any number of times (Running)
//! ```
//!
//! Writes are fire-and-forget. The store does not read back what it wrote;
//! use [`FeedbackReader`](crate::reader::FeedbackReader) for that.
//!
//! # Partial PID updates
//!
//! [`set_pid`](ParameterStore::set_pid) is two register writes. If the device
//! fails between them, register 3 holds the new set point/kp and register 4
//! the old ki/kd. The store reports the failure and does not roll back or
//! retry. Callers that need the pair to land together rewrite the full pair.

use rpu_proto::{
    compute_scale, IntegralDerivative, OutputLimits, RegisterIndex, ScaleParam, ScannerBias,
    SetpointProportional, ACCUMULATOR_MAX,
};
use tracing::{debug, info, warn};

use crate::config::FeedbackConfig;
use crate::device::RegisterAccess;
use crate::error::{FeedbackError, FeedbackResult};
use crate::pid::PidParams;

/// Whether the RPU control loop has been started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    /// Registers are being programmed; the loop is not running yet.
    Configuring,
    /// The loop is running; only live-tunable registers may change.
    Running,
}

/// Writes RPU feedback parameters through a register device.
///
/// # Example
///
/// ```
/// use feedback::device::RegisterBank;
/// use feedback::store::ParameterStore;
///
/// let mut bank = RegisterBank::new();
/// let mut store = ParameterStore::new(&mut bank, 1000);
///
/// store.set_scale(16)?;
/// store.set_limits(0.0, 1.0)?;
/// store.set_pid(0.001, 660.0, 69.0, 4200.0)?;
/// store.mark_loop_started();
///
/// // gains stay tunable while the loop runs
/// store.set_pid(0.002, 600.0, 69.0, 4200.0)?;
/// # Ok::<(), feedback::FeedbackError>(())
/// ```
pub struct ParameterStore<D: RegisterAccess> {
    device: D,
    samples_per_pixel: u64,
    phase: LoopPhase,
    scale: Option<f32>,
}

impl<D: RegisterAccess> ParameterStore<D> {
    /// Create a store for a session whose lock-in integrates
    /// `samples_per_pixel` ADC samples per pixel.
    pub fn new(device: D, samples_per_pixel: u64) -> Self {
        Self {
            device,
            samples_per_pixel,
            phase: LoopPhase::Configuring,
            scale: None,
        }
    }

    pub fn samples_per_pixel(&self) -> u64 {
        self.samples_per_pixel
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    /// Scale factor written by the last successful [`set_scale`](Self::set_scale).
    pub fn programmed_scale(&self) -> Option<f32> {
        self.scale
    }

    /// Program the lock-in amplitude scale for a sliding window of
    /// `window_length` pixels.
    ///
    /// Issues exactly one write, to the scale register, with the reserved high
    /// half set to 0.0. Returns the value written.
    ///
    /// # Errors
    ///
    /// - [`FeedbackError::LoopRunning`] once [`mark_loop_started`](Self::mark_loop_started) was called
    /// - [`FeedbackError::Domain`] if `window_length` or the session's samples per pixel is zero
    /// - [`FeedbackError::Device`] if the write fails
    pub fn set_scale(&mut self, window_length: u64) -> FeedbackResult<f32> {
        if self.phase == LoopPhase::Running {
            return Err(FeedbackError::LoopRunning(RegisterIndex::Scale));
        }

        let scale = compute_scale(ACCUMULATOR_MAX, self.samples_per_pixel, window_length)? as f32;
        if scale == 0.0 {
            return Err(FeedbackError::Domain(format!(
                "scale underflows f32 (samples_per_pixel={}, window_length={window_length})",
                self.samples_per_pixel
            )));
        }

        if let Some(previous) = self.scale {
            debug!("Reprogramming scale: {:e} -> {:e}", previous, scale);
        }
        self.device.write_typed(&ScaleParam { scale })?;
        self.scale = Some(scale);

        info!(
            "Programmed scale {:e} (spp={}, nsw={})",
            scale, self.samples_per_pixel, window_length
        );
        Ok(scale)
    }

    /// Program the limits of the normalized control output.
    ///
    /// # Errors
    ///
    /// - [`FeedbackError::InvalidLimits`] unless `0.0 <= low < high <= 1.0`; nothing is written
    /// - [`FeedbackError::Device`] if the write fails
    pub fn set_limits(&mut self, low: f32, high: f32) -> FeedbackResult<OutputLimits> {
        let limits = OutputLimits::new(low, high)?;

        if self.phase == LoopPhase::Running {
            // device-side effect of new limits mid-loop is not defined
            warn!(
                "Changing output limits to {} while the feedback loop is running",
                limits
            );
        }

        self.device.write_typed(&limits)?;
        debug!("Programmed output limits {}", limits);
        Ok(limits)
    }

    /// Program set point and gains.
    ///
    /// Two writes: `(set_point, kp)` to register 3, then `(ki, kd)` to
    /// register 4. The RPU may observe the pair inconsistent between them.
    ///
    /// # Errors
    ///
    /// - [`FeedbackError::Domain`] if any value is NaN or infinite; nothing is written
    /// - [`FeedbackError::Device`] if either write fails
    pub fn set_pid(&mut self, set_point: f32, kp: f32, ki: f32, kd: f32) -> FeedbackResult<()> {
        self.set_pid_params(&PidParams::new(set_point, kp, ki, kd))
    }

    /// [`set_pid`](Self::set_pid) taking a [`PidParams`].
    pub fn set_pid_params(&mut self, params: &PidParams) -> FeedbackResult<()> {
        if let Some(name) = params.first_non_finite() {
            return Err(FeedbackError::Domain(format!(
                "PID parameter {name} must be finite"
            )));
        }

        self.device.write_typed(&SetpointProportional {
            set_point: params.set_point,
            kp: params.kp,
        })?;
        self.device.write_typed(&IntegralDerivative {
            ki: params.ki,
            kd: params.kd,
        })?;

        debug!(
            "Programmed PID sp={:e} kp={} ki={} kd={}",
            params.set_point, params.kp, params.ki, params.kd
        );
        Ok(())
    }

    /// Program the normalized X/Y scanner bias. Live-tunable.
    ///
    /// # Errors
    ///
    /// - [`FeedbackError::Domain`] unless both values lie in `[0.0, 1.0]`
    /// - [`FeedbackError::Device`] if the write fails
    pub fn set_scanner(&mut self, x: f32, y: f32) -> FeedbackResult<ScannerBias> {
        for (axis, value) in [("x", x), ("y", y)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(FeedbackError::Domain(format!(
                    "scanner {axis} bias {value} outside [0.0, 1.0]"
                )));
            }
        }

        let bias = ScannerBias { x, y };
        self.device.write_typed(&bias)?;
        debug!("Programmed scanner bias x={:.4} y={:.4}", x, y);
        Ok(bias)
    }

    /// Run the full startup sequence for a session: scale, limits, PID, scanner.
    ///
    /// The whole configuration is validated before the first write.
    pub fn configure(&mut self, config: &FeedbackConfig) -> FeedbackResult<()> {
        config.validate()?;
        if config.samples_per_pixel != self.samples_per_pixel {
            warn!(
                "Config samples_per_pixel={} differs from session value {}, using session value",
                config.samples_per_pixel, self.samples_per_pixel
            );
        }

        self.set_scale(config.window_length)?;
        self.set_limits(config.limits.low, config.limits.high)?;
        self.set_pid_params(&config.pid)?;
        self.set_scanner(config.scanner.x, config.scanner.y)?;
        Ok(())
    }

    /// Record that the RPU loop is now running.
    pub fn mark_loop_started(&mut self) {
        if self.scale.is_none() {
            warn!("Feedback loop started without a programmed scale");
        }
        self.phase = LoopPhase::Running;
        info!("Feedback loop marked as running");
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_inner(self) -> D {
        self.device
    }
}
