//! Software stand-in for the RPU feedback program.
//!
//! [`SimulatedRpu`] runs the same register protocol as the firmware against
//! any [`RegisterAccess`] device, usually a [`SharedDevice`] whose other clone
//! is held by the host-side store and reader. A simple tip-sample [`Plant`]
//! turns the Z bias into a lock-in amplitude so the loop has something to
//! regulate.
//!
//! [`SharedDevice`]: crate::device::SharedDevice

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rpu_proto::{
    ErrorControl, IntegralDerivative, IterationCount, OutputLimits, ScaleParam, ScannerBias,
    SetpointProportional, ACCUMULATOR_MAX,
};
use tracing::{debug, error, info, trace};

use crate::device::RegisterAccess;
use crate::error::{DeviceError, FeedbackError, FeedbackResult};
use crate::pid::{PidController, PidParams};
use crate::pixels::{amplitude_squared, PixelBatch, PixelRecord};

/// Oscillation amplitude versus Z bias for a tip approaching a surface.
///
/// Below `surface_bias` the tip is in contact and the oscillation is fully
/// damped. Above it the amplitude grows linearly over `interaction_width` and
/// then saturates at `free_amplitude`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plant {
    /// Amplitude of the free oscillation, in lock-in units
    pub free_amplitude: f32,
    /// Normalized Z bias at which the tip touches the surface
    pub surface_bias: f32,
    /// Bias range over which the amplitude recovers
    pub interaction_width: f32,
    /// Lock-in phase of the oscillation in radians
    pub phase: f32,
}

impl Plant {
    pub fn amplitude(&self, bias: f32) -> f32 {
        let fraction = (bias - self.surface_bias) / self.interaction_width;
        self.free_amplitude * fraction.clamp(0.0, 1.0)
    }

    /// In-phase and quadrature components at the given bias.
    pub fn demodulate(&self, bias: f32) -> (f32, f32) {
        let amp = self.amplitude(bias);
        (amp * self.phase.cos(), amp * self.phase.sin())
    }
}

impl Default for Plant {
    fn default() -> Self {
        Self {
            free_amplitude: 0.2,
            surface_bias: 0.3,
            interaction_width: 0.4,
            phase: 0.6,
        }
    }
}

/// Parameters of the simulated acquisition chain.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    pub plant: Plant,
    /// ADC samples per raw pixel
    pub samples_per_pixel: u64,
    /// Raw pixels per summed pixel (NSW)
    pub window_length: u64,
    /// Input channel the host-path pixels are published on
    pub input_channel: u8,
    /// RPU cycles spent per loop iteration (1953 is about 256 kHz at 500 MHz)
    pub cycles_per_iteration: u32,
    /// Standard deviation of the noise added to host-path pixels
    pub noise_std: f32,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            plant: Plant::default(),
            samples_per_pixel: 1000,
            window_length: 16,
            input_channel: 1,
            cycles_per_iteration: 1953,
            noise_std: 0.0,
            seed: 42,
        }
    }
}

/// Loop state established by [`SimulatedRpu::start`].
#[derive(Debug, Clone)]
struct Running {
    controller: PidController,
    scale: f32,
    limits: OutputLimits,
    scanner: ScannerBias,
    bias: f32,
}

/// Register-level model of the RPU feedback program.
///
/// # Example
///
/// ```
/// use feedback::device::{RegisterBank, SharedDevice};
/// use feedback::sim::{SimConfig, SimulatedRpu};
/// use feedback::store::ParameterStore;
///
/// let device = SharedDevice::new(RegisterBank::new());
/// let mut store = ParameterStore::new(device.clone(), 1000);
/// store.set_scale(16)?;
/// store.set_limits(0.0, 1.0)?;
/// store.set_pid(0.01, 0.0, 1.0, 0.0)?;
///
/// let mut rpu = SimulatedRpu::new(device, SimConfig::default())?;
/// rpu.start()?;
/// store.mark_loop_started();
/// rpu.run_for(10)?;
/// assert_eq!(rpu.iterations(), 10);
/// # Ok::<(), feedback::FeedbackError>(())
/// ```
pub struct SimulatedRpu<D: RegisterAccess> {
    device: D,
    config: SimConfig,
    running: Option<Running>,
    iterations: u32,
    cycle_counter: u32,
    pixels: Option<Sender<PixelBatch>>,
    sequence: u64,
    rng: StdRng,
    noise: Normal<f32>,
}

impl<D: RegisterAccess> SimulatedRpu<D> {
    /// # Errors
    ///
    /// [`FeedbackError::Domain`] if the noise level is negative or not finite.
    pub fn new(device: D, config: SimConfig) -> FeedbackResult<Self> {
        if config.noise_std.is_nan() || config.noise_std < 0.0 {
            return Err(FeedbackError::Domain(format!(
                "noise level {} must be a non-negative standard deviation",
                config.noise_std
            )));
        }
        let noise = Normal::new(0.0, config.noise_std)
            .map_err(|e| FeedbackError::Domain(format!("noise level {}: {e}", config.noise_std)))?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            device,
            config,
            running: None,
            iterations: 0,
            cycle_counter: 0,
            pixels: None,
            sequence: 0,
            rng,
            noise,
        })
    }

    /// Publish a host-path pixel batch on `sender` once per window.
    pub fn with_pixel_sender(mut self, sender: Sender<PixelBatch>) -> Self {
        self.pixels = Some(sender);
        self
    }

    /// Reset the loop and load scale, limits and PID from the registers.
    ///
    /// Limits are clamped into `[0.0, 1.0]` and not read again until the
    /// next start; gains and scanner bias are re-read every iteration.
    pub fn start(&mut self) -> FeedbackResult<()> {
        self.iterations = 0;
        self.cycle_counter = 0;
        self.device.write_typed(&IterationCount::default())?;

        let scale = self.device.read_typed::<ScaleParam>()?.scale;
        let limits = self.device.read_typed::<OutputLimits>()?.clamped();
        let params = self.read_pid()?;
        let scanner: ScannerBias = self.device.read_typed()?;

        let controller = PidController::new(params).with_output_limits(limits.low, limits.high);
        let bias = limits.low;
        self.device.write_typed(&ErrorControl {
            amplitude_squared: 0.0,
            control_bias: bias,
        })?;

        info!(
            "Simulated RPU started: scale={:e}, limits={}, pid={:?}",
            scale, limits, params
        );
        self.running = Some(Running {
            controller,
            scale,
            limits,
            scanner,
            bias,
        });
        Ok(())
    }

    /// Run one loop iteration. Returns the new Z bias.
    pub fn iterate(&mut self) -> FeedbackResult<f32> {
        let running = self
            .running
            .as_mut()
            .ok_or_else(|| DeviceError::new("simulated RPU has not been started"))?;

        let (i, q) = self.config.plant.demodulate(running.bias);
        let full_scale = ACCUMULATOR_MAX as f64
            * self.config.samples_per_pixel as f64
            * self.config.window_length as f64;
        let raw_i = (i as f64 * full_scale).round() as i64;
        let raw_q = (q as f64 * full_scale).round() as i64;

        let scaled = PixelRecord::new(raw_i as f32 * running.scale, raw_q as f32 * running.scale);
        let amp2 = amplitude_squared(&scaled);
        let bias = running.controller.update(amp2);
        running.bias = bias;
        trace!("iteration {}: amp2={:e} bias={}", self.iterations, amp2, bias);

        self.device.write_typed(&ErrorControl {
            amplitude_squared: amp2,
            control_bias: bias,
        })?;

        let params = self.read_pid()?;
        let scanner: ScannerBias = self.device.read_typed()?;
        if let Some(running) = self.running.as_mut() {
            running.controller.set_params(params);
            running.scanner = scanner;
        }

        self.iterations = self.iterations.wrapping_add(1);
        self.cycle_counter = self
            .cycle_counter
            .wrapping_add(self.config.cycles_per_iteration);
        self.device.write_typed(&IterationCount {
            iterations: self.iterations,
            cycle_counter: self.cycle_counter,
        })?;

        if self.iterations as u64 % self.config.window_length.max(1) == 0 {
            self.publish_pixels(bias);
        }
        Ok(bias)
    }

    /// Run `n` iterations back to back.
    pub fn run_for(&mut self, n: u32) -> FeedbackResult<f32> {
        let mut bias = self.bias().unwrap_or_default();
        for _ in 0..n {
            bias = self.iterate()?;
        }
        Ok(bias)
    }

    fn read_pid(&mut self) -> FeedbackResult<PidParams> {
        let sp: SetpointProportional = self.device.read_typed()?;
        let id: IntegralDerivative = self.device.read_typed()?;
        Ok(PidParams::new(sp.set_point, sp.kp, id.ki, id.kd))
    }

    fn publish_pixels(&mut self, bias: f32) {
        let Some(sender) = &self.pixels else {
            return;
        };
        let (i, q) = self.config.plant.demodulate(bias);
        let record = PixelRecord::new(
            i + self.noise.sample(&mut self.rng),
            q + self.noise.sample(&mut self.rng),
        );
        let batch = PixelBatch::new(self.sequence).with_channel(self.config.input_channel, record);
        if sender.send(batch).is_err() {
            debug!("Pixel receiver dropped, no longer publishing");
            self.pixels = None;
            return;
        }
        self.sequence += 1;
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Current Z bias, or `None` before [`start`](Self::start).
    pub fn bias(&self) -> Option<f32> {
        self.running.as_ref().map(|r| r.bias)
    }

    /// Gains the controller is currently using.
    pub fn controller_params(&self) -> Option<PidParams> {
        self.running.as_ref().map(|r| r.controller.params())
    }

    /// Limits loaded at start, after clamping.
    pub fn limits(&self) -> Option<OutputLimits> {
        self.running.as_ref().map(|r| r.limits)
    }

    pub fn scale(&self) -> Option<f32> {
        self.running.as_ref().map(|r| r.scale)
    }

    pub fn scanner(&self) -> Option<ScannerBias> {
        self.running.as_ref().map(|r| r.scanner)
    }

    pub fn into_inner(self) -> D {
        self.device
    }
}

impl<D: RegisterAccess + Send + 'static> SimulatedRpu<D> {
    /// Run the loop on its own thread until `stop` is raised.
    ///
    /// The thread sleeps `period` between iterations. The simulator is handed
    /// back when the thread is joined.
    pub fn spawn(mut self, period: Duration, stop: Arc<AtomicBool>) -> JoinHandle<FeedbackResult<Self>> {
        thread::spawn(move || {
            if self.running.is_none() {
                self.start()?;
            }
            while !stop.load(Ordering::Relaxed) {
                if let Err(e) = self.iterate() {
                    error!("Simulated RPU loop stopped: {}", e);
                    return Err(e);
                }
                if !period.is_zero() {
                    thread::sleep(period);
                }
            }
            info!("Simulated RPU stopped after {} iterations", self.iterations);
            Ok(self)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RegisterBank;
    use crate::store::ParameterStore;
    use approx::assert_relative_eq;
    use crossbeam_channel::unbounded;

    fn programmed_bank(pid: PidParams, low: f32, high: f32) -> RegisterBank {
        let mut store = ParameterStore::new(RegisterBank::new(), 1000);
        store.set_scale(16).unwrap();
        store.set_limits(low, high).unwrap();
        store.set_pid_params(&pid).unwrap();
        store.into_inner()
    }

    #[test]
    fn test_plant_amplitude_profile() {
        let plant = Plant::default();
        assert_eq!(plant.amplitude(0.0), 0.0);
        assert_relative_eq!(plant.amplitude(0.5), 0.1, max_relative = 1e-5);
        assert_eq!(plant.amplitude(1.0), plant.free_amplitude);
    }

    #[test]
    fn test_iterate_before_start_fails() {
        let mut rpu = SimulatedRpu::new(RegisterBank::new(), SimConfig::default()).unwrap();
        assert!(matches!(rpu.iterate(), Err(FeedbackError::Device(_))));
    }

    #[test]
    fn test_invalid_noise_rejected() {
        for noise_std in [-1.0, -f32::MIN_POSITIVE, f32::NAN, f32::INFINITY] {
            let config = SimConfig {
                noise_std,
                ..Default::default()
            };
            assert!(
                matches!(
                    SimulatedRpu::new(RegisterBank::new(), config),
                    Err(FeedbackError::Domain(_))
                ),
                "noise_std={noise_std} accepted"
            );
        }
    }

    #[test]
    fn test_long_run_leaves_default_bank_without_log() {
        let bank = programmed_bank(PidParams::new(0.01, 0.0, 1.0, 0.0), 0.0, 1.0);
        let mut rpu = SimulatedRpu::new(bank, SimConfig::default()).unwrap();
        rpu.start().unwrap();
        rpu.run_for(5000).unwrap();
        assert!(rpu.into_inner().write_log().is_empty());
    }

    #[test]
    fn test_status_registers_written_each_iteration() {
        let bank = programmed_bank(PidParams::new(0.01, 0.0, 1.0, 0.0), 0.0, 1.0);
        let mut rpu = SimulatedRpu::new(bank, SimConfig::default()).unwrap();
        rpu.start().unwrap();
        rpu.run_for(3).unwrap();

        let mut bank = rpu.into_inner();
        let count: IterationCount = bank.read_typed().unwrap();
        assert_eq!(count.iterations, 3);
        assert_eq!(count.cycle_counter, 3 * 1953);
    }

    #[test]
    fn test_rpu_amplitude_matches_plant_after_scaling() {
        let bank = programmed_bank(PidParams::new(0.0, 0.0, 0.0, 0.0), 0.5, 1.0);
        let mut rpu = SimulatedRpu::new(bank, SimConfig::default()).unwrap();
        rpu.start().unwrap();
        rpu.iterate().unwrap();

        let mut bank = rpu.into_inner();
        let signals: ErrorControl = bank.read_typed().unwrap();
        // bias started at the low limit, 0.5, where the plant gives 0.1
        assert_relative_eq!(signals.amplitude_squared, 0.01, max_relative = 1e-3);
    }

    #[test]
    fn test_converges_to_set_point() {
        let bank = programmed_bank(PidParams::new(0.01, 0.0, 1.0, 0.0), 0.0, 1.0);
        let mut rpu = SimulatedRpu::new(bank, SimConfig::default()).unwrap();
        rpu.start().unwrap();
        let bias = rpu.run_for(2000).unwrap();

        assert_relative_eq!(bias, 0.5, max_relative = 1e-3);
        let mut bank = rpu.into_inner();
        let signals: ErrorControl = bank.read_typed().unwrap();
        assert_relative_eq!(signals.amplitude_squared, 0.01, max_relative = 1e-3);
    }

    #[test]
    fn test_limits_clamped_on_start() {
        let mut bank = programmed_bank(PidParams::default(), 0.0, 1.0);
        bank.write_typed(&OutputLimits {
            low: -0.5,
            high: 1.5,
        })
        .unwrap();
        let mut rpu = SimulatedRpu::new(bank, SimConfig::default()).unwrap();
        rpu.start().unwrap();
        assert_eq!(rpu.limits(), Some(OutputLimits::FULL));
    }

    #[test]
    fn test_publishes_one_batch_per_window() {
        let (tx, rx) = unbounded();
        let bank = programmed_bank(PidParams::new(0.01, 0.0, 1.0, 0.0), 0.0, 1.0);
        let mut rpu = SimulatedRpu::new(bank, SimConfig::default())
            .unwrap()
            .with_pixel_sender(tx);
        rpu.start().unwrap();
        rpu.run_for(64).unwrap();

        let batches: Vec<PixelBatch> = rx.try_iter().collect();
        assert_eq!(batches.len(), 4);
        assert_eq!(batches[3].sequence, 3);
        assert!(batches[0].channel(1).is_some());
    }

    #[test]
    fn test_spawn_stops_on_flag() {
        let bank = programmed_bank(PidParams::new(0.01, 0.0, 1.0, 0.0), 0.0, 1.0);
        let rpu = SimulatedRpu::new(bank, SimConfig::default()).unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let handle = rpu.spawn(Duration::from_micros(10), Arc::clone(&stop));
        thread::sleep(Duration::from_millis(20));
        stop.store(true, Ordering::Relaxed);

        let rpu = handle.join().unwrap().unwrap();
        assert!(rpu.iterations() > 0);
    }
}
