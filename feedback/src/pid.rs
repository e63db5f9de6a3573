//! PID control law executed by the RPU.
//!
//! The host never runs this loop against real hardware; the firmware does.
//! It is modelled here so the simulated RPU behaves like the device and so
//! gain choices can be checked offline.

use serde::{Deserialize, Serialize};

/// Time constant of the first-order filter on the derivative term, in
/// iterations. `0.5` disables the filter.
pub const DERIVATIVE_FILTER_TAU: f32 = 3.5;

/// Set point and gains of the feedback controller.
///
/// These are the values carried by registers 3 and 4. They only need to be
/// finite; an unstable choice of gains is the caller's responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidParams {
    /// Target amplitude² of the lock-in error signal
    pub set_point: f32,
    /// Proportional gain
    pub kp: f32,
    /// Integral gain
    pub ki: f32,
    /// Derivative gain
    pub kd: f32,
}

impl PidParams {
    pub fn new(set_point: f32, kp: f32, ki: f32, kd: f32) -> Self {
        Self {
            set_point,
            kp,
            ki,
            kd,
        }
    }

    /// Name of the first non-finite field, if any.
    pub fn first_non_finite(&self) -> Option<&'static str> {
        [
            ("set_point", self.set_point),
            ("kp", self.kp),
            ("ki", self.ki),
            ("kd", self.kd),
        ]
        .into_iter()
        .find(|(_, v)| !v.is_finite())
        .map(|(name, _)| name)
    }
}

impl Default for PidParams {
    /// Starting parameters used with the Z piezo lock-in setup.
    fn default() -> Self {
        Self::new(0.001, 660.0, 69.0, 4200.0)
    }
}

/// A proportional-integral-derivative controller.
///
/// The derivative acts on the measurement rather than the error, so set point
/// changes do not kick the output. Both the integrator and the output are
/// clamped; the integrator limits default to the output limits.
///
/// # Example
///
/// ```
/// use feedback::pid::{PidController, PidParams};
///
/// let mut pid = PidController::new(PidParams::new(0.01, 0.0, 1.0, 0.0))
///     .with_output_limits(0.0, 1.0);
///
/// let out = pid.update(0.0);
/// assert!(out > 0.0 && out <= 1.0);
/// ```
#[derive(Debug, Clone)]
pub struct PidController {
    params: PidParams,

    lim_min: f32,
    lim_max: f32,
    lim_min_int: f32,
    lim_max_int: f32,

    integrator: f32,
    differentiator: f32,
    prev_measurement: f32,
}

impl PidController {
    /// Controller with unbounded output.
    pub fn new(params: PidParams) -> Self {
        Self {
            params,
            lim_min: f32::NEG_INFINITY,
            lim_max: f32::INFINITY,
            lim_min_int: f32::NEG_INFINITY,
            lim_max_int: f32::INFINITY,
            integrator: 0.0,
            differentiator: 0.0,
            prev_measurement: 0.0,
        }
    }

    /// Clamp the output (and, unless set separately, the integrator).
    pub fn with_output_limits(mut self, min: f32, max: f32) -> Self {
        self.lim_min = min;
        self.lim_max = max;
        self.lim_min_int = min;
        self.lim_max_int = max;
        self
    }

    /// Clamp the integrator independently to prevent windup.
    pub fn with_integrator_limits(mut self, min: f32, max: f32) -> Self {
        self.lim_min_int = min;
        self.lim_max_int = max;
        self
    }

    pub fn params(&self) -> PidParams {
        self.params
    }

    /// Replace set point and gains; controller memory is kept.
    pub fn set_params(&mut self, params: PidParams) {
        self.params = params;
    }

    pub fn output_limits(&self) -> (f32, f32) {
        (self.lim_min, self.lim_max)
    }

    /// Feed a new measurement and get the next output.
    pub fn update(&mut self, measurement: f32) -> f32 {
        let PidParams {
            set_point,
            kp,
            ki,
            kd,
        } = self.params;

        let error = set_point - measurement;
        let proportional = kp * error;

        self.integrator = (self.integrator + ki * error).clamp(self.lim_min_int, self.lim_max_int);

        // derivative on measurement, hence the leading minus
        self.differentiator = -(2.0 * kd * (measurement - self.prev_measurement)
            + (2.0 * DERIVATIVE_FILTER_TAU - 1.0) * self.differentiator)
            / (2.0 * DERIVATIVE_FILTER_TAU + 1.0);

        self.prev_measurement = measurement;

        (proportional + self.integrator + self.differentiator).clamp(self.lim_min, self.lim_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_proportional_only() {
        let mut pid = PidController::new(PidParams::new(1.0, 2.0, 0.0, 0.0));
        assert_relative_eq!(pid.update(0.25), 1.5);
        assert_relative_eq!(pid.update(1.0), 0.0);
    }

    #[test]
    fn test_integrator_accumulates_and_clamps() {
        let mut pid =
            PidController::new(PidParams::new(1.0, 0.0, 0.1, 0.0)).with_output_limits(0.0, 0.25);
        assert_relative_eq!(pid.update(0.0), 0.1);
        assert_relative_eq!(pid.update(0.0), 0.2);
        assert_relative_eq!(pid.update(0.0), 0.25);
        // clamped integrator unwinds immediately
        assert_relative_eq!(pid.update(2.0), 0.15);
    }

    #[test]
    fn test_separate_integrator_limits() {
        let mut pid = PidController::new(PidParams::new(1.0, 0.0, 1.0, 0.0))
            .with_output_limits(0.0, 10.0)
            .with_integrator_limits(0.0, 2.0);
        for _ in 0..5 {
            pid.update(0.0);
        }
        assert_relative_eq!(pid.update(1.0), 2.0);
    }

    #[test]
    fn test_derivative_on_measurement_is_filtered() {
        let mut pid = PidController::new(PidParams::new(0.0, 0.0, 0.0, 1.0));
        // step of +1 in the measurement
        let out = pid.update(1.0);
        let expected = -(2.0 * 1.0) / (2.0 * DERIVATIVE_FILTER_TAU + 1.0);
        assert_relative_eq!(out, expected);

        // no further change: filtered term decays
        let next = pid.update(1.0);
        assert!(next.abs() < out.abs());
        let later = (0..50).fold(next, |_, _| pid.update(1.0));
        assert!(later.abs() < 1e-5);
    }

    #[test]
    fn test_setpoint_change_does_not_kick_derivative() {
        let mut pid = PidController::new(PidParams::new(0.0, 0.0, 0.0, 5.0));
        pid.update(0.5);
        pid.update(0.5);
        let before = pid.update(0.5);
        pid.set_params(PidParams::new(10.0, 0.0, 0.0, 5.0));
        let after = pid.update(0.5);
        assert!(after.abs() <= before.abs());
    }

    #[test]
    fn test_output_limits_hold() {
        let mut pid =
            PidController::new(PidParams::new(1.0, 1e6, 0.0, 0.0)).with_output_limits(0.2, 0.8);
        assert_eq!(pid.update(0.0), 0.8);
        assert_eq!(pid.update(2.0), 0.2);
        assert_eq!(pid.output_limits(), (0.2, 0.8));
    }

    #[test]
    fn test_first_non_finite() {
        assert_eq!(PidParams::default().first_non_finite(), None);
        assert_eq!(
            PidParams::new(0.0, 1.0, f32::NAN, 0.0).first_non_finite(),
            Some("ki")
        );
        assert_eq!(
            PidParams::new(f32::INFINITY, 1.0, 1.0, 0.0).first_non_finite(),
            Some("set_point")
        );
    }
}
