//! Decoding of RPU status and read-back of programmed parameters.

use rpu_proto::{
    ErrorControl, IntegralDerivative, IterationCount, OutputLimits, ScaleParam, ScannerBias,
    SetpointProportional,
};
use tracing::trace;

use crate::device::RegisterAccess;
use crate::error::FeedbackResult;
use crate::pid::PidParams;

/// Approximate RPU core clock, used to turn cycle counts into time.
pub const RPU_CLOCK_HZ: f64 = 500e6;

/// Snapshot of the feedback loop as published by the RPU.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackStatus {
    /// Processed loop iterations since the loop started (wraps at `u32::MAX`)
    pub iterations: u32,
    /// RPU cycle counter at the time `iterations` was written (wraps)
    pub cycle_counter: u32,
    /// Squared lock-in amplitude seen by the RPU (error signal)
    pub amplitude_squared: f32,
    /// Normalized Z bias currently applied (control signal)
    pub control_bias: f32,
}

impl FeedbackStatus {
    /// Iterations processed between `earlier` and `self`, modulo 2^32.
    pub fn iterations_since(&self, earlier: &FeedbackStatus) -> u32 {
        self.iterations.wrapping_sub(earlier.iterations)
    }

    /// RPU cycles elapsed between `earlier` and `self`, modulo 2^32.
    ///
    /// At 500 MHz the counter wraps every ~8.6 s, so polls must be closer
    /// together than that for the value to be meaningful.
    pub fn cycles_since(&self, earlier: &FeedbackStatus) -> u32 {
        self.cycle_counter.wrapping_sub(earlier.cycle_counter)
    }

    /// Loop rate in iterations per second between two status samples.
    ///
    /// Returns `None` if no cycles elapsed.
    pub fn iteration_rate_hz(&self, earlier: &FeedbackStatus) -> Option<f64> {
        let cycles = self.cycles_since(earlier);
        if cycles == 0 {
            return None;
        }
        let seconds = cycles as f64 / RPU_CLOCK_HZ;
        Some(self.iterations_since(earlier) as f64 / seconds)
    }
}

/// Reads feedback registers from the device. Nothing is cached.
///
/// The reader performs no scheduling; call [`read_status`](Self::read_status)
/// on whatever polling cadence suits the caller.
pub struct FeedbackReader<D: RegisterAccess> {
    device: D,
}

impl<D: RegisterAccess> FeedbackReader<D> {
    pub fn new(device: D) -> Self {
        Self { device }
    }

    /// Read the iteration register, then the error/control register.
    ///
    /// The two reads are separate accesses; the RPU may complete an iteration
    /// between them.
    pub fn read_status(&mut self) -> FeedbackResult<FeedbackStatus> {
        let count: IterationCount = self.device.read_typed()?;
        let signals: ErrorControl = self.device.read_typed()?;

        let status = FeedbackStatus {
            iterations: count.iterations,
            cycle_counter: count.cycle_counter,
            amplitude_squared: signals.amplitude_squared,
            control_bias: signals.control_bias,
        };
        trace!("RPU status: {:?}", status);
        Ok(status)
    }

    /// Scale factor currently held in the scale register.
    pub fn read_scale(&mut self) -> FeedbackResult<f32> {
        Ok(self.device.read_typed::<ScaleParam>()?.scale)
    }

    /// Output limits exactly as stored (not clamped).
    pub fn read_limits(&mut self) -> FeedbackResult<OutputLimits> {
        Ok(self.device.read_typed()?)
    }

    /// Set point and gains from registers 3 and 4.
    ///
    /// Like the write, this is two accesses and may straddle an update.
    pub fn read_pid(&mut self) -> FeedbackResult<PidParams> {
        let sp: SetpointProportional = self.device.read_typed()?;
        let id: IntegralDerivative = self.device.read_typed()?;
        Ok(PidParams::new(sp.set_point, sp.kp, id.ki, id.kd))
    }

    pub fn read_scanner(&mut self) -> FeedbackResult<ScannerBias> {
        Ok(self.device.read_typed()?)
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_inner(self) -> D {
        self.device
    }
}
