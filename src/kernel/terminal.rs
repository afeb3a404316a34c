//! Pseudo-terminal node
//!
//! Two rings, one per direction. A handle opened with
//! [`OpenFlags::MASTER`] is the controlling side: it reads what the slave
//! wrote and writes what the slave will read.

use super::pipe::RingBuffer;
use super::resource::{Handle, IoCall, IoError, IoReply, IoResult, OpenFlags, Resource};
use std::any::Any;

#[derive(Debug)]
pub struct Terminal {
    pub width: u16,
    pub height: u16,
    master_to_slave: RingBuffer,
    slave_to_master: RingBuffer,
}

impl Terminal {
    pub const BUFFER_SIZE: usize = 1024;

    pub fn new() -> Self {
        Self {
            width: 80,
            height: 25,
            master_to_slave: RingBuffer::new(Self::BUFFER_SIZE),
            slave_to_master: RingBuffer::new(Self::BUFFER_SIZE),
        }
    }

    fn inbound(&self, handle: &Handle) -> &RingBuffer {
        if handle.flags.contains(OpenFlags::MASTER) {
            &self.slave_to_master
        } else {
            &self.master_to_slave
        }
    }

    fn outbound(&self, handle: &Handle) -> &RingBuffer {
        if handle.flags.contains(OpenFlags::MASTER) {
            &self.master_to_slave
        } else {
            &self.slave_to_master
        }
    }
}

impl Default for Terminal {
    fn default() -> Self {
        Self::new()
    }
}

impl Resource for Terminal {
    fn name(&self) -> &str {
        "terminal"
    }

    fn can_read(&self, handle: &Handle) -> bool {
        !self.inbound(handle).is_empty()
    }

    fn can_write(&self, handle: &Handle) -> bool {
        !self.outbound(handle).is_full()
    }

    fn read(&mut self, handle: &Handle, buf: &mut [u8]) -> IoResult<usize> {
        let ring = if handle.flags.contains(OpenFlags::MASTER) {
            &mut self.slave_to_master
        } else {
            &mut self.master_to_slave
        };
        if ring.is_empty() {
            return Err(IoError::WouldBlock);
        }
        Ok(ring.read(buf))
    }

    fn write(&mut self, handle: &Handle, data: &[u8]) -> IoResult<usize> {
        let ring = if handle.flags.contains(OpenFlags::MASTER) {
            &mut self.master_to_slave
        } else {
            &mut self.slave_to_master
        };
        match ring.write(data) {
            0 if !data.is_empty() => Err(IoError::WouldBlock),
            written => Ok(written),
        }
    }

    fn call(&mut self, _handle: &Handle, request: IoCall) -> IoResult<IoReply> {
        match request {
            IoCall::GetSize => Ok(IoReply::Size {
                width: self.width,
                height: self.height,
            }),
            IoCall::SetSize { width, height } => {
                if width == 0 || height == 0 {
                    return Err(IoError::InvalidArgument);
                }
                self.width = width;
                self.height = height;
                Ok(IoReply::Done)
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
