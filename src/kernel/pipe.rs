//! Pipes
//!
//! A pipe is a bounded byte queue between tasks. Reader and writer counts
//! follow the handles opened on it, and running out of either is how a
//! pipe reports "closed": a reader with no writers left sees EOF, a writer
//! with no readers left gets a broken pipe. Both count as ready so blocked
//! tasks wake up and find out.

use super::resource::{Handle, IoError, IoResult, OpenFlags, Resource};
use std::any::Any;
use std::collections::VecDeque;

/// Bounded byte ring, shared by the stream resources
#[derive(Debug)]
pub struct RingBuffer {
    data: VecDeque<u8>,
    capacity: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push as much of `data` as fits, returning the count taken
    pub fn write(&mut self, data: &[u8]) -> usize {
        let to_write = data.len().min(self.room());
        self.data.extend(&data[..to_write]);
        to_write
    }

    /// Pop up to `buf.len()` bytes
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let to_read = buf.len().min(self.data.len());
        for (slot, byte) in buf.iter_mut().zip(self.data.drain(..to_read)) {
            *slot = byte;
        }
        to_read
    }

    pub fn push(&mut self, byte: u8) -> bool {
        if self.is_full() {
            return false;
        }
        self.data.push_back(byte);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.data.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn room(&self) -> usize {
        self.capacity - self.data.len()
    }
}

/// An anonymous pipe
#[derive(Debug)]
pub struct Pipe {
    buffer: RingBuffer,
    readers: u32,
    writers: u32,
}

impl Pipe {
    pub const DEFAULT_CAPACITY: usize = 4096;

    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: RingBuffer::new(capacity),
            readers: 0,
            writers: 0,
        }
    }

    /// Bytes waiting to be read
    pub fn available(&self) -> usize {
        self.buffer.len()
    }

    pub fn readers(&self) -> u32 {
        self.readers
    }

    pub fn writers(&self) -> u32 {
        self.writers
    }
}

impl Default for Pipe {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl Resource for Pipe {
    fn name(&self) -> &str {
        "pipe"
    }

    fn can_read(&self, handle: &Handle) -> bool {
        handle.flags.contains(OpenFlags::READ) && (!self.buffer.is_empty() || self.writers == 0)
    }

    fn can_write(&self, handle: &Handle) -> bool {
        handle.flags.contains(OpenFlags::WRITE) && (!self.buffer.is_full() || self.readers == 0)
    }

    fn read(&mut self, _handle: &Handle, buf: &mut [u8]) -> IoResult<usize> {
        if self.buffer.is_empty() {
            if self.writers == 0 {
                return Ok(0); // EOF
            }
            return Err(IoError::WouldBlock);
        }
        Ok(self.buffer.read(buf))
    }

    fn write(&mut self, _handle: &Handle, data: &[u8]) -> IoResult<usize> {
        if self.readers == 0 {
            return Err(IoError::BrokenPipe);
        }
        let written = self.buffer.write(data);
        if written == 0 && !data.is_empty() {
            Err(IoError::WouldBlock)
        } else {
            Ok(written)
        }
    }

    fn opened(&mut self, flags: OpenFlags) {
        if flags.contains(OpenFlags::READ) {
            self.readers += 1;
        }
        if flags.contains(OpenFlags::WRITE) {
            self.writers += 1;
        }
    }

    fn closed(&mut self, flags: OpenFlags) {
        if flags.contains(OpenFlags::READ) {
            self.readers = self.readers.saturating_sub(1);
        }
        if flags.contains(OpenFlags::WRITE) {
            self.writers = self.writers.saturating_sub(1);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
