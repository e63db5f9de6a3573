//! Register access to the RPU parameter area.
//!
//! The device-communication layer (connection management, transport) lives
//! outside this crate. It is consumed through the [`RegisterAccess`] trait,
//! which is the only place raw register values cross into the driver.
//!
//! Two implementations ship here:
//!
//! - [`RegisterBank`] - an explicit indexed array of 64-bit cells, used as
//!   the simulated device and in tests
//! - [`SharedDevice`] - wraps any device so that several callers (status
//!   poller, parameter updates, a simulated RPU) take turns on one channel
//!
//! # Access discipline
//!
//! The register protocol has no transactions. Writing the two PID registers is
//! two independent accesses, and a reader interleaved between them sees the
//! new set point/kp next to the old ki/kd. Callers that need the pair to be
//! observed consistently hold the lock for the whole sequence with
//! [`SharedDevice::with_locked`].

use std::sync::{Arc, Mutex, MutexGuard};

use rpu_proto::{Register, RegisterIndex, PARAM_REGISTER_COUNT};
use tracing::trace;

use crate::error::DeviceError;

/// Synchronous, bounded-latency register access supplied by the device layer.
///
/// Implementations must not retry internally; failures are returned as
/// [`DeviceError`] and surfaced to the caller unchanged.
pub trait RegisterAccess {
    /// Write a raw 64-bit value to a parameter register.
    fn write_register(&mut self, index: RegisterIndex, value: u64) -> Result<(), DeviceError>;

    /// Read the raw 64-bit value of a parameter register.
    fn read_register(&mut self, index: RegisterIndex) -> Result<u64, DeviceError>;

    /// Encode and write a typed register value.
    fn write_typed<R: Register>(&mut self, value: &R) -> Result<(), DeviceError>
    where
        Self: Sized,
    {
        self.write_register(R::INDEX, value.encode())
    }

    /// Read and decode a typed register value.
    fn read_typed<R: Register>(&mut self) -> Result<R, DeviceError>
    where
        Self: Sized,
    {
        self.read_register(R::INDEX).map(R::decode)
    }
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for &mut T {
    fn write_register(&mut self, index: RegisterIndex, value: u64) -> Result<(), DeviceError> {
        (**self).write_register(index, value)
    }

    fn read_register(&mut self, index: RegisterIndex) -> Result<u64, DeviceError> {
        (**self).read_register(index)
    }
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for Box<T> {
    fn write_register(&mut self, index: RegisterIndex, value: u64) -> Result<(), DeviceError> {
        (**self).write_register(index, value)
    }

    fn read_register(&mut self, index: RegisterIndex) -> Result<u64, DeviceError> {
        (**self).read_register(index)
    }
}

/// In-memory parameter area: [`PARAM_REGISTER_COUNT`] cells of 64 bits.
///
/// All cells start at zero. A bank built with
/// [`with_write_log`](Self::with_write_log) also records every write so tests
/// can check the exact sequence the driver produced; the default bank keeps
/// nothing but the cells, so it can sit behind a free-running loop.
#[derive(Debug, Clone)]
pub struct RegisterBank {
    cells: [u64; PARAM_REGISTER_COUNT],
    write_log: Option<Vec<(RegisterIndex, u64)>>,
}

impl RegisterBank {
    pub fn new() -> Self {
        Self {
            cells: [0; PARAM_REGISTER_COUNT],
            write_log: None,
        }
    }

    /// Bank that records every write.
    pub fn with_write_log() -> Self {
        Self {
            cells: [0; PARAM_REGISTER_COUNT],
            write_log: Some(Vec::new()),
        }
    }

    pub fn is_logging(&self) -> bool {
        self.write_log.is_some()
    }

    /// Raw value of a cell without going through the access trait.
    pub fn peek(&self, index: RegisterIndex) -> u64 {
        self.cells[index.index()]
    }

    /// All writes performed so far, oldest first. Empty unless logging.
    pub fn write_log(&self) -> &[(RegisterIndex, u64)] {
        self.write_log.as_deref().unwrap_or(&[])
    }

    pub fn clear_write_log(&mut self) {
        if let Some(log) = self.write_log.as_mut() {
            log.clear();
        }
    }
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterAccess for RegisterBank {
    fn write_register(&mut self, index: RegisterIndex, value: u64) -> Result<(), DeviceError> {
        trace!("bank write {} <- {:#018x}", index, value);
        self.cells[index.index()] = value;
        if let Some(log) = self.write_log.as_mut() {
            log.push((index, value));
        }
        Ok(())
    }

    fn read_register(&mut self, index: RegisterIndex) -> Result<u64, DeviceError> {
        let value = self.cells[index.index()];
        trace!("bank read {} -> {:#018x}", index, value);
        Ok(value)
    }
}

/// A device shared between several callers, one access at a time.
///
/// Cloning is cheap and every clone refers to the same device. Each
/// [`RegisterAccess`] call takes the lock for exactly one register access.
#[derive(Debug)]
pub struct SharedDevice<D> {
    inner: Arc<Mutex<D>>,
}

impl<D> Clone for SharedDevice<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: RegisterAccess> SharedDevice<D> {
    pub fn new(device: D) -> Self {
        Self {
            inner: Arc::new(Mutex::new(device)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, D>, DeviceError> {
        self.inner
            .lock()
            .map_err(|_| DeviceError::new("register channel lock poisoned"))
    }

    /// Run several accesses while holding the channel exclusively.
    ///
    /// No other clone can read or write between the accesses made by `f`.
    pub fn with_locked<T, E>(&self, f: impl FnOnce(&mut D) -> Result<T, E>) -> Result<T, E>
    where
        E: From<DeviceError>,
    {
        let mut guard = self.lock()?;
        f(&mut *guard)
    }
}

impl<D: RegisterAccess> RegisterAccess for SharedDevice<D> {
    fn write_register(&mut self, index: RegisterIndex, value: u64) -> Result<(), DeviceError> {
        self.lock()?.write_register(index, value)
    }

    fn read_register(&mut self, index: RegisterIndex) -> Result<u64, DeviceError> {
        self.lock()?.read_register(index)
    }
}
