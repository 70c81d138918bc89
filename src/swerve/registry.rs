// Device registry: one live handle per bus identifier
//
// Physical devices cannot be safely double-initialized, and a steer servo's
// integrated encoder head shares the servo's bus id with the steer
// controller itself. The registry makes lookup-or-create atomic so the
// at-most-one-instance invariant holds even if modules are brought up
// concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::swerve::backend::bus::{BusResult, Register, ServoBus};

/// Handle to one servo on the shared bus.
///
/// All reads and writes go through the bus mutex; after single-threaded
/// startup they are issued serially by the control loop, so the lock is
/// uncontended in steady state.
pub struct ServoDevice {
    id: u8,
    bus: Arc<Mutex<ServoBus>>,
}

impl ServoDevice {
    pub fn id(&self) -> u8 {
        self.id
    }

    fn bus(&self) -> MutexGuard<'_, ServoBus> {
        self.bus.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ping(&self) -> BusResult<bool> {
        self.bus().ping(self.id)
    }

    pub fn write_u8(&self, register: Register, value: u8) -> BusResult<()> {
        self.bus().write_u8(self.id, register, value)
    }

    pub fn write_u16(&self, register: Register, value: u16) -> BusResult<()> {
        self.bus().write_u16(self.id, register, value)
    }

    pub fn write_i16(&self, register: Register, value: i16) -> BusResult<()> {
        self.bus().write_i16(self.id, register, value)
    }

    pub fn write_i32(&self, register: Register, value: i32) -> BusResult<()> {
        self.bus().write_i32(self.id, register, value)
    }

    pub fn read_u8(&self, register: Register) -> BusResult<u8> {
        self.bus().read_u8(self.id, register)
    }

    pub fn read_u16(&self, register: Register) -> BusResult<u16> {
        self.bus().read_u16(self.id, register)
    }

    pub fn read_i16(&self, register: Register) -> BusResult<i16> {
        self.bus().read_i16(self.id, register)
    }

    pub fn read_i32(&self, register: Register) -> BusResult<i32> {
        self.bus().read_i32(self.id, register)
    }
}

/// Process-lifetime map from bus identifier to the single live device
/// handle. Constructed once at subsystem start and passed by reference to
/// anything needing device lookup.
pub struct DeviceRegistry {
    bus: Arc<Mutex<ServoBus>>,
    devices: Mutex<HashMap<u8, Arc<ServoDevice>>>,
}

impl DeviceRegistry {
    /// Opens the serial bus and an empty registry.
    pub fn open(port_name: &str) -> BusResult<Self> {
        Ok(Self::with_bus(ServoBus::open(port_name)?))
    }

    pub fn with_bus(bus: ServoBus) -> Self {
        Self {
            bus: Arc::new(Mutex::new(bus)),
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the handle for `id`, creating it on first access.
    ///
    /// Check-then-insert happens under one lock so two callers asking for
    /// the same id always get the identical handle.
    pub fn device(&self, id: u8) -> Arc<ServoDevice> {
        let mut devices = self
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(devices.entry(id).or_insert_with(|| {
            debug!("registering servo device {}", id);
            Arc::new(ServoDevice {
                id,
                bus: Arc::clone(&self.bus),
            })
        }))
    }
}
