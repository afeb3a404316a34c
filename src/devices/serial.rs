//! Legacy serial port
//!
//! Received bytes sit in the UART until the interrupt handler drains them
//! into a receive ring; reads are served from the ring. The UART itself is
//! behind [`SerialLine`] so the device runs against an in-memory line.

use super::{Device, DeviceAddress, DeviceClass, LegacyAddress};
use crate::kernel::pipe::RingBuffer;
use crate::kernel::resource::{Handle, IoError, IoResult, Resource};
use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// The UART seen from the driver
pub trait SerialLine {
    /// A received byte is waiting
    fn can_receive(&self) -> bool;

    /// Take one received byte. Only valid after `can_receive`.
    fn receive(&mut self) -> u8;

    fn transmit(&mut self, data: &[u8]) -> usize;
}

#[derive(Debug, Default)]
struct LineState {
    incoming: VecDeque<u8>,
    outgoing: Vec<u8>,
}

/// In-memory serial line; clones share the same wire
#[derive(Debug, Clone, Default)]
pub struct MemoryLine {
    state: Rc<RefCell<LineState>>,
}

impl MemoryLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes arriving from the far end
    pub fn inject(&self, data: &[u8]) {
        self.state.borrow_mut().incoming.extend(data);
    }

    /// Bytes received but not yet drained
    pub fn pending(&self) -> usize {
        self.state.borrow().incoming.len()
    }

    /// Everything sent so far
    pub fn transmitted(&self) -> Vec<u8> {
        self.state.borrow().outgoing.clone()
    }
}

impl SerialLine for MemoryLine {
    fn can_receive(&self) -> bool {
        !self.state.borrow().incoming.is_empty()
    }

    fn receive(&mut self) -> u8 {
        self.state.borrow_mut().incoming.pop_front().unwrap_or(0)
    }

    fn transmit(&mut self, data: &[u8]) -> usize {
        self.state.borrow_mut().outgoing.extend_from_slice(data);
        data.len()
    }
}

pub struct LegacySerial {
    address: LegacyAddress,
    line: Box<dyn SerialLine>,
    rx: RingBuffer,
    /// Bytes lost to a full receive ring
    overruns: u64,
}

impl LegacySerial {
    pub const BUFFER_SIZE: usize = 4096;

    pub fn new(address: LegacyAddress, line: impl SerialLine + 'static) -> Self {
        Self {
            address,
            line: Box::new(line),
            rx: RingBuffer::new(Self::BUFFER_SIZE),
            overruns: 0,
        }
    }

    pub fn buffered(&self) -> usize {
        self.rx.len()
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }
}

impl Resource for LegacySerial {
    fn name(&self) -> &str {
        "serial"
    }

    fn can_read(&self, _handle: &Handle) -> bool {
        !self.rx.is_empty()
    }

    fn can_write(&self, _handle: &Handle) -> bool {
        true
    }

    fn read(&mut self, _handle: &Handle, buf: &mut [u8]) -> IoResult<usize> {
        if self.rx.is_empty() {
            return Err(IoError::WouldBlock);
        }
        Ok(self.rx.read(buf))
    }

    fn write(&mut self, _handle: &Handle, data: &[u8]) -> IoResult<usize> {
        Ok(self.line.transmit(data))
    }

    fn as_device_mut(&mut self) -> Option<&mut dyn Device> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Device for LegacySerial {
    fn address(&self) -> DeviceAddress {
        DeviceAddress::Legacy(self.address)
    }

    fn class(&self) -> DeviceClass {
        DeviceClass::Serial
    }

    fn handle_interrupt(&mut self) {
        while self.line.can_receive() {
            let byte = self.line.receive();
            if !self.rx.push(byte) {
                self.overruns += 1;
            }
        }
        if self.overruns > 0 {
            log::trace!("serial {} overruns: {}", self.address, self.overruns);
        }
    }

    fn into_resource(self: Box<Self>) -> Box<dyn Resource> {
        self
    }
}
