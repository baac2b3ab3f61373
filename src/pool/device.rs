//! Device Assignment Registry
//!
//! Hands every worker a unique ordinal at startup and derives its device as
//! `ordinal / processes_per_device`. The registry is created once by the
//! pool and passed to each worker explicitly.

use std::fmt;

use parking_lot::Mutex;
use serde::Serialize;

use super::types::PoolError;

/// Device a worker is bound to for its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    /// CPU pseudo-device used when no accelerators are present
    Cpu,
    /// Accelerator by index
    Accelerator(usize),
}

impl Device {
    pub fn index(&self) -> Option<usize> {
        match self {
            Device::Cpu => None,
            Device::Accelerator(i) => Some(*i),
        }
    }

    pub fn is_accelerator(&self) -> bool {
        matches!(self, Device::Accelerator(_))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Accelerator(i) => write!(f, "cuda:{}", i),
        }
    }
}

impl Serialize for Device {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Race-free ordinal and device assignment
#[derive(Debug)]
pub struct DeviceRegistry {
    next_ordinal: Mutex<usize>,
    device_count: usize,
    processes_per_device: usize,
}

impl DeviceRegistry {
    pub fn new(device_count: usize, processes_per_device: usize) -> Self {
        Self {
            next_ordinal: Mutex::new(0),
            device_count,
            processes_per_device: processes_per_device.max(1),
        }
    }

    /// Workers the devices can host; 1 when there are no accelerators
    pub fn capacity(&self) -> usize {
        if self.device_count == 0 {
            1
        } else {
            self.device_count * self.processes_per_device
        }
    }

    pub fn device_count(&self) -> usize {
        self.device_count
    }

    pub fn processes_per_device(&self) -> usize {
        self.processes_per_device
    }

    /// Number of ordinals handed out so far
    pub fn assigned(&self) -> usize {
        *self.next_ordinal.lock()
    }

    /// Take the next ordinal and resolve its device.
    ///
    /// Fails when the derived device index has no backing accelerator. The
    /// ordinal is consumed even on failure.
    pub fn assign_next(&self) -> Result<(usize, Device), PoolError> {
        let ordinal = {
            let mut next = self.next_ordinal.lock();
            let ordinal = *next;
            *next += 1;
            ordinal
        };
        Ok((ordinal, self.device_for(ordinal)?))
    }

    /// Device for a given ordinal
    pub fn device_for(&self, ordinal: usize) -> Result<Device, PoolError> {
        if self.device_count == 0 {
            return Ok(Device::Cpu);
        }

        let index = ordinal / self.processes_per_device;
        if index >= self.device_count {
            return Err(PoolError::DeviceUnavailable {
                ordinal,
                device: index,
                available: self.device_count,
            });
        }
        Ok(Device::Accelerator(index))
    }
}
