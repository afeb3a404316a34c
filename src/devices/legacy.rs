//! Legacy (ISA) bus
//!
//! Devices at fixed I/O port addresses with fixed interrupt lines.

use super::{Bus, Device, DeviceAddress, DeviceDriver};

/// I/O port base of a legacy device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LegacyAddress(pub u16);

impl LegacyAddress {
    pub const KEYBOARD: LegacyAddress = LegacyAddress(0x60);
    pub const MOUSE: LegacyAddress = LegacyAddress(0x64);
    pub const COM1: LegacyAddress = LegacyAddress(0x3F8);
    pub const COM2: LegacyAddress = LegacyAddress(0x2F8);
    pub const COM3: LegacyAddress = LegacyAddress(0x3E8);
    pub const COM4: LegacyAddress = LegacyAddress(0x2E8);
}

impl std::fmt::Display for LegacyAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Interrupt line wired to a legacy address
///
/// Only the addresses in [`LegacyAddress`] are wired; asking for any other
/// one means the device table is corrupt, which is fatal.
pub fn legacy_irq(address: LegacyAddress) -> u8 {
    match address {
        LegacyAddress::KEYBOARD => 1,
        LegacyAddress::COM2 | LegacyAddress::COM4 => 3,
        LegacyAddress::COM1 | LegacyAddress::COM3 => 4,
        LegacyAddress::MOUSE => 12,
        other => unreachable!("no interrupt line for legacy address {}", other),
    }
}

type Factory = Box<dyn Fn(LegacyAddress) -> Box<dyn Device>>;

/// Driver for exactly one legacy address
pub struct LegacyDeviceDriver {
    name: &'static str,
    address: LegacyAddress,
    factory: Factory,
}

impl LegacyDeviceDriver {
    pub fn new<D, F>(name: &'static str, address: LegacyAddress, factory: F) -> Self
    where
        D: Device,
        F: Fn(LegacyAddress) -> D + 'static,
    {
        Self {
            name,
            address,
            factory: Box::new(move |address| -> Box<dyn Device> { Box::new(factory(address)) }),
        }
    }

    pub fn address(&self) -> LegacyAddress {
        self.address
    }
}

impl DeviceDriver for LegacyDeviceDriver {
    fn bus(&self) -> Bus {
        Bus::Legacy
    }

    fn name(&self) -> &str {
        self.name
    }

    fn matches(&self, address: DeviceAddress) -> bool {
        address.legacy() == Some(self.address)
    }

    fn instantiate(&self, address: DeviceAddress) -> Box<dyn Device> {
        match address {
            DeviceAddress::Legacy(legacy) => (self.factory)(legacy),
        }
    }
}
