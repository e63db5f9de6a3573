//! Host-side driver for the RPU lock-in feedback loop.
//!
//! The RPU runs a PID loop that holds the lock-in amplitude of an oscillating
//! tip at a set point by adjusting the normalized Z bias. The host programs
//! and monitors that loop through a small bank of 64-bit parameter registers
//! (see [`rpu_proto`]) and independently receives the summed lock-in pixel
//! stream.
//!
//! # Modules
//!
//! - [`store`] - program scale, limits, PID gains and scanner bias
//! - [`reader`] - poll iteration count, error and control signals
//! - [`pixels`] - host-side amplitude² from the pixel stream
//! - [`device`] - register access seam, in-memory bank, shared handle
//! - [`sim`] - software RPU for running the loop without hardware
//! - [`pid`] - the control law the RPU executes
//! - [`config`] - JSON session configuration
//!
//! # Startup order
//!
//! Scale must be programmed before the loop starts and is frozen afterwards:
//!
//! 1. [`ParameterStore::configure`] (or the individual setters)
//! 2. start the loop on the RPU
//! 3. [`ParameterStore::mark_loop_started`]
//! 4. poll with [`FeedbackReader::read_status`]

pub mod config;
pub mod device;
pub mod error;
pub mod pid;
pub mod pixels;
pub mod reader;
pub mod sim;
pub mod store;

pub use config::FeedbackConfig;
pub use device::{RegisterAccess, RegisterBank, SharedDevice};
pub use error::{DeviceError, FeedbackError, FeedbackResult};
pub use pid::{PidController, PidParams};
pub use pixels::{amplitude_squared, CrossCheck, PixelBatch, PixelRecord, PixelStreamAggregator};
pub use reader::{FeedbackReader, FeedbackStatus};
pub use sim::{Plant, SimConfig, SimulatedRpu};
pub use store::{LoopPhase, ParameterStore};
