//! Local stream sockets
//!
//! A [`Listener`] queues pending [`Connection`]s. Connecting creates the
//! connection in the `Pending` state and queues it; accepting pops it and
//! flips it to `Accepted`, which is what a task blocked in connect waits
//! for. A listener that shuts down refuses everything still queued, so
//! those connectors wake up too.

use super::pipe::RingBuffer;
use super::resource::{Handle, IoError, IoResult, OpenFlags, Resource, ResourceId};
use std::any::Any;
use std::collections::VecDeque;

/// Listening socket
#[derive(Debug)]
pub struct Listener {
    backlog: VecDeque<ResourceId>,
    capacity: usize,
    closed: bool,
}

impl Listener {
    pub fn new(backlog: usize) -> Self {
        Self {
            backlog: VecDeque::new(),
            capacity: backlog.max(1),
            closed: false,
        }
    }

    /// Queue a pending connection
    pub fn push(&mut self, connection: ResourceId) -> IoResult<()> {
        if self.closed {
            return Err(IoError::ConnectionRefused);
        }
        if self.backlog.len() >= self.capacity {
            return Err(IoError::BufferFull);
        }
        self.backlog.push_back(connection);
        Ok(())
    }

    /// Next pending connection, oldest first
    pub fn pop(&mut self) -> Option<ResourceId> {
        self.backlog.pop_front()
    }

    /// Drop a queued connection whose connector gave up
    pub fn withdraw(&mut self, connection: ResourceId) -> bool {
        let before = self.backlog.len();
        self.backlog.retain(|c| *c != connection);
        self.backlog.len() != before
    }

    /// Stop listening; returns the connections still queued
    pub fn shutdown(&mut self) -> Vec<ResourceId> {
        self.closed = true;
        self.backlog.drain(..).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn pending(&self) -> usize {
        self.backlog.len()
    }
}

impl Resource for Listener {
    fn name(&self) -> &str {
        "listener"
    }

    fn can_accept(&self) -> bool {
        !self.backlog.is_empty() || self.closed
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Queued on a listener
    Pending,
    Accepted,
    /// The listener shut down before accepting
    Refused,
}

/// One stream connection; handles with [`OpenFlags::SERVER`] are the
/// accepting end, the rest are the connecting end
#[derive(Debug)]
pub struct Connection {
    pub listener: ResourceId,
    state: ConnectionState,
    to_server: RingBuffer,
    to_client: RingBuffer,
    client_handles: u32,
    server_handles: u32,
}

impl Connection {
    pub const BUFFER_SIZE: usize = 4096;

    pub fn new(listener: ResourceId) -> Self {
        Self {
            listener,
            state: ConnectionState::Pending,
            to_server: RingBuffer::new(Self::BUFFER_SIZE),
            to_client: RingBuffer::new(Self::BUFFER_SIZE),
            client_handles: 0,
            server_handles: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn accept(&mut self) {
        if self.state == ConnectionState::Pending {
            self.state = ConnectionState::Accepted;
        }
    }

    pub fn refuse(&mut self) {
        if self.state == ConnectionState::Pending {
            self.state = ConnectionState::Refused;
        }
    }

    fn is_server(handle: &Handle) -> bool {
        handle.flags.contains(OpenFlags::SERVER)
    }

    /// The other end has no open handles left
    fn peer_gone(&self, handle: &Handle) -> bool {
        if Self::is_server(handle) {
            self.client_handles == 0
        } else {
            self.server_handles == 0
        }
    }

    fn inbound_mut(&mut self, handle: &Handle) -> &mut RingBuffer {
        if Self::is_server(handle) {
            &mut self.to_server
        } else {
            &mut self.to_client
        }
    }
}

impl Resource for Connection {
    fn name(&self) -> &str {
        "connection"
    }

    fn can_read(&self, handle: &Handle) -> bool {
        let inbound = if Self::is_server(handle) {
            &self.to_server
        } else {
            &self.to_client
        };
        match self.state {
            ConnectionState::Pending => false,
            ConnectionState::Refused => true,
            ConnectionState::Accepted => !inbound.is_empty() || self.peer_gone(handle),
        }
    }

    fn can_write(&self, handle: &Handle) -> bool {
        let outbound = if Self::is_server(handle) {
            &self.to_client
        } else {
            &self.to_server
        };
        match self.state {
            ConnectionState::Pending => false,
            ConnectionState::Refused => true,
            ConnectionState::Accepted => !outbound.is_full() || self.peer_gone(handle),
        }
    }

    fn is_accepted(&self) -> bool {
        self.state != ConnectionState::Pending
    }

    fn read(&mut self, handle: &Handle, buf: &mut [u8]) -> IoResult<usize> {
        match self.state {
            ConnectionState::Pending => return Err(IoError::WouldBlock),
            ConnectionState::Refused => return Err(IoError::ConnectionRefused),
            ConnectionState::Accepted => {}
        }
        let peer_gone = self.peer_gone(handle);
        let inbound = self.inbound_mut(handle);
        if inbound.is_empty() {
            return if peer_gone { Ok(0) } else { Err(IoError::WouldBlock) };
        }
        Ok(inbound.read(buf))
    }

    fn write(&mut self, handle: &Handle, data: &[u8]) -> IoResult<usize> {
        match self.state {
            ConnectionState::Pending => return Err(IoError::WouldBlock),
            ConnectionState::Refused => return Err(IoError::ConnectionRefused),
            ConnectionState::Accepted => {}
        }
        if self.peer_gone(handle) {
            return Err(IoError::BrokenPipe);
        }
        let outbound = if Self::is_server(handle) {
            &mut self.to_client
        } else {
            &mut self.to_server
        };
        match outbound.write(data) {
            0 if !data.is_empty() => Err(IoError::WouldBlock),
            written => Ok(written),
        }
    }

    fn opened(&mut self, flags: OpenFlags) {
        if flags.contains(OpenFlags::SERVER) {
            self.server_handles += 1;
        } else {
            self.client_handles += 1;
        }
    }

    fn closed(&mut self, flags: OpenFlags) {
        if flags.contains(OpenFlags::SERVER) {
            self.server_handles = self.server_handles.saturating_sub(1);
        } else {
            self.client_handles = self.client_handles.saturating_sub(1);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
