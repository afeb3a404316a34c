//! Device model
//!
//! A [`Device`] is a [`Resource`] that is also wired to an interrupt line.
//! Drivers are registered per bus; probing an address picks the first
//! registered driver that claims it and instantiates the device.

pub mod legacy;
pub mod serial;

pub use legacy::{legacy_irq, LegacyAddress, LegacyDeviceDriver};
pub use serial::{LegacySerial, MemoryLine, SerialLine};

use crate::kernel::resource::Resource;

/// Bus a device sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bus {
    /// Fixed ISA-era I/O ports
    Legacy,
}

/// Where a device lives on its bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceAddress {
    Legacy(LegacyAddress),
}

impl DeviceAddress {
    pub fn bus(&self) -> Bus {
        match self {
            DeviceAddress::Legacy(_) => Bus::Legacy,
        }
    }

    pub fn legacy(&self) -> Option<LegacyAddress> {
        match self {
            DeviceAddress::Legacy(address) => Some(*address),
        }
    }
}

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceAddress::Legacy(address) => write!(f, "legacy:{}", address),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Keyboard,
    Mouse,
    Serial,
}

/// A resource backed by hardware
pub trait Device: Resource {
    fn address(&self) -> DeviceAddress;

    fn class(&self) -> DeviceClass;

    /// Interrupt line this device raises
    fn interrupt(&self) -> u8 {
        match self.address() {
            DeviceAddress::Legacy(address) => legacy_irq(address),
        }
    }

    /// Service a pending interrupt. Runs with exclusive access to the
    /// device, so readiness predicates never observe a half-drained state.
    fn handle_interrupt(&mut self);

    /// Hand the device to the resource table
    fn into_resource(self: Box<Self>) -> Box<dyn Resource>;
}

/// Knows how to recognise and instantiate devices on one bus
pub trait DeviceDriver {
    fn bus(&self) -> Bus;

    fn name(&self) -> &str;

    fn matches(&self, address: DeviceAddress) -> bool;

    fn instantiate(&self, address: DeviceAddress) -> Box<dyn Device>;
}

/// Registered drivers, in registration order
#[derive(Default)]
pub struct DriverRegistry {
    drivers: Vec<Box<dyn DeviceDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with drivers for the standard legacy serial ports
    pub fn with_legacy_serial() -> Self {
        let mut registry = Self::new();
        for (name, address) in [
            ("com1", LegacyAddress::COM1),
            ("com2", LegacyAddress::COM2),
            ("com3", LegacyAddress::COM3),
            ("com4", LegacyAddress::COM4),
        ] {
            registry.register(Box::new(LegacyDeviceDriver::new(name, address, |address| {
                LegacySerial::new(address, MemoryLine::new())
            })));
        }
        registry
    }

    pub fn register(&mut self, driver: Box<dyn DeviceDriver>) {
        log::debug!("registered driver {} ({:?})", driver.name(), driver.bus());
        self.drivers.push(driver);
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.drivers.iter().map(|d| d.name()).collect()
    }

    /// First driver on the address's bus that claims it
    pub fn find(&self, address: DeviceAddress) -> Option<&dyn DeviceDriver> {
        self.drivers
            .iter()
            .find(|d| d.bus() == address.bus() && d.matches(address))
            .map(|d| &**d)
    }

    /// Instantiate the device at `address`, if any driver claims it
    pub fn probe(&self, address: DeviceAddress) -> Option<Box<dyn Device>> {
        match self.find(address) {
            Some(driver) => {
                log::debug!("{} claims {}", driver.name(), address);
                Some(driver.instantiate(address))
            }
            None => {
                log::debug!("no driver for {}", address);
                None
            }
        }
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}
