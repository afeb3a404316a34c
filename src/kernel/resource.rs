//! Waitable resources
//!
//! Anything a task can block on (pipes, terminals, sockets, devices)
//! implements [`Resource`]: non-blocking readiness predicates evaluated
//! against current state, plus the data path used once the task resumes.
//!
//! Every resource lives in a [`ResourceTable`] slot next to its own
//! [`NodeLock`]. The lock is what keeps a readiness event from being handed
//! to two tasks: blockers only fire while the resource is unlocked, and the
//! winner claims the lock as its unblock action. The table is borrowed
//! mutably for the whole evaluation pass, so no other lock attempt can land
//! between a predicate check and the acquisition that follows it.

use super::task::TaskId;
use crate::devices::Device;
use bitflags::bitflags;
use serde::Serialize;
use slab::Slab;
use std::any::Any;

/// Resource identifier - a slot in the resource table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ResourceId(pub usize);

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "res:{}", self.0)
    }
}

/// Open handle identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct HandleId(pub usize);

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handle:{}", self.0)
    }
}

bitflags! {
    /// How a handle was opened
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        /// Master side of a terminal
        const MASTER = 1 << 2;
        /// Server end of a connection
        const SERVER = 1 << 3;
        const NONBLOCK = 1 << 4;
        const RDWR = Self::READ.bits() | Self::WRITE.bits();
    }
}

bitflags! {
    /// Readiness events for select
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SelectEvents: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        /// A listener has a connection waiting
        const ACCEPT = 1 << 2;
        /// A connection has been accepted (or refused) by its peer
        const CONNECT = 1 << 3;
        /// The handle went away. Reported regardless of interest
        const CLOSED = 1 << 4;
    }
}

/// A task's view of a resource: which resource, where, and how
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle {
    pub resource: ResourceId,
    /// Cursor, advanced by completed reads and writes
    pub offset: u64,
    pub flags: OpenFlags,
}

impl Handle {
    pub fn new(resource: ResourceId, flags: OpenFlags) -> Self {
        Self {
            resource,
            offset: 0,
            flags,
        }
    }
}

/// Error types for resource I/O
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoError {
    /// No data / no room right now
    WouldBlock,
    /// Writing with no reader left
    BrokenPipe,
    /// The resource does not do that
    NotSupported,
    /// Queue or buffer is full
    BufferFull,
    /// Peer refused or went away before accepting
    ConnectionRefused,
    /// Handle is not open
    BadHandle,
    /// No resource in that slot
    NoSuchResource,
    /// Unlock attempted by a task that does not hold the lock
    NotHolder(ResourceId),
    /// Handle was not opened for this kind of access
    PermissionDenied,
    InvalidArgument,
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::WouldBlock => write!(f, "operation would block"),
            IoError::BrokenPipe => write!(f, "broken pipe"),
            IoError::NotSupported => write!(f, "operation not supported"),
            IoError::BufferFull => write!(f, "buffer full"),
            IoError::ConnectionRefused => write!(f, "connection refused"),
            IoError::BadHandle => write!(f, "bad handle"),
            IoError::NoSuchResource => write!(f, "no such resource"),
            IoError::NotHolder(id) => write!(f, "lock on {} not held by caller", id),
            IoError::PermissionDenied => write!(f, "permission denied"),
            IoError::InvalidArgument => write!(f, "invalid argument"),
        }
    }
}

impl std::error::Error for IoError {}

/// Result type for resource I/O
pub type IoResult<T> = Result<T, IoError>;

/// Out-of-band requests (ioctl-style)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoCall {
    GetSize,
    SetSize { width: u16, height: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoReply {
    Done,
    Size { width: u16, height: u16 },
}

/// The capability contract of a waitable resource
///
/// Predicates must not block and must describe the state at call time.
/// A resource that can never satisfy a waiter again (peer gone, writer
/// closed) reports ready and lets the data path surface the condition.
pub trait Resource: Any {
    /// Short name for logs
    fn name(&self) -> &str;

    fn can_read(&self, handle: &Handle) -> bool {
        let _ = handle;
        false
    }

    fn can_write(&self, handle: &Handle) -> bool {
        let _ = handle;
        false
    }

    fn can_accept(&self) -> bool {
        false
    }

    /// Connect completion: the peer accepted (or refused) this connection
    fn is_accepted(&self) -> bool {
        false
    }

    /// Events ready on `handle`, restricted to `interest`
    fn ready_events(&self, handle: &Handle, interest: SelectEvents) -> SelectEvents {
        let mut ready = SelectEvents::empty();
        if interest.contains(SelectEvents::READ) && self.can_read(handle) {
            ready |= SelectEvents::READ;
        }
        if interest.contains(SelectEvents::WRITE) && self.can_write(handle) {
            ready |= SelectEvents::WRITE;
        }
        if interest.contains(SelectEvents::ACCEPT) && self.can_accept() {
            ready |= SelectEvents::ACCEPT;
        }
        if interest.contains(SelectEvents::CONNECT) && self.is_accepted() {
            ready |= SelectEvents::CONNECT;
        }
        ready
    }

    fn read(&mut self, handle: &Handle, buf: &mut [u8]) -> IoResult<usize> {
        let _ = (handle, buf);
        Err(IoError::NotSupported)
    }

    fn write(&mut self, handle: &Handle, data: &[u8]) -> IoResult<usize> {
        let _ = (handle, data);
        Err(IoError::NotSupported)
    }

    fn call(&mut self, handle: &Handle, request: IoCall) -> IoResult<IoReply> {
        let _ = (handle, request);
        Err(IoError::NotSupported)
    }

    /// A handle was opened on this resource
    fn opened(&mut self, flags: OpenFlags) {
        let _ = flags;
    }

    /// A handle on this resource was closed
    fn closed(&mut self, flags: OpenFlags) {
        let _ = flags;
    }

    fn as_device_mut(&mut self) -> Option<&mut dyn Device> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Exclusive lock on one resource, keyed by task
///
/// The holder is a plain task id: the lock never keeps a task alive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeLock {
    holder: Option<TaskId>,
}

impl NodeLock {
    pub fn is_locked(&self) -> bool {
        self.holder.is_some()
    }

    pub fn holder(&self) -> Option<TaskId> {
        self.holder
    }

    /// Claim the lock. Only valid on an unlocked resource.
    pub fn acquire(&mut self, task: TaskId) {
        assert!(
            self.holder.is_none(),
            "lock already held by {:?}, {} cannot acquire",
            self.holder,
            task
        );
        self.holder = Some(task);
    }

    pub fn release(&mut self, task: TaskId) -> bool {
        if self.holder == Some(task) {
            self.holder = None;
            true
        } else {
            false
        }
    }
}

struct Node {
    lock: NodeLock,
    resource: Box<dyn Resource>,
    /// Open handles on this node
    handles: usize,
    /// Freed when the last handle closes
    transient: bool,
}

/// All resources and open handles
#[derive(Default)]
pub struct ResourceTable {
    nodes: Slab<Node>,
    handles: Slab<Handle>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<R: Resource>(&mut self, resource: R) -> ResourceId {
        self.insert_boxed(Box::new(resource))
    }

    pub fn insert_boxed(&mut self, resource: Box<dyn Resource>) -> ResourceId {
        self.insert_node(resource, false)
    }

    /// Insert a resource that lives only as long as its handles: closing
    /// the last one removes it from the table
    pub fn insert_transient<R: Resource>(&mut self, resource: R) -> ResourceId {
        self.insert_node(Box::new(resource), true)
    }

    fn insert_node(&mut self, resource: Box<dyn Resource>, transient: bool) -> ResourceId {
        ResourceId(self.nodes.insert(Node {
            lock: NodeLock::default(),
            resource,
            handles: 0,
            transient,
        }))
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.nodes.contains(id.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: ResourceId) -> Option<&(dyn Resource + 'static)> {
        self.nodes.get(id.0).map(|node| node.resource.as_ref())
    }

    pub fn get_mut(&mut self, id: ResourceId) -> Option<&mut (dyn Resource + 'static)> {
        match self.nodes.get_mut(id.0) {
            Some(node) => Some(node.resource.as_mut()),
            None => None,
        }
    }

    /// Borrow a resource as its concrete type
    pub fn get_as<T: Resource>(&self, id: ResourceId) -> Option<&T> {
        self.nodes.get(id.0)?.resource.as_any().downcast_ref::<T>()
    }

    pub fn get_as_mut<T: Resource>(&mut self, id: ResourceId) -> Option<&mut T> {
        self.nodes
            .get_mut(id.0)?
            .resource
            .as_any_mut()
            .downcast_mut::<T>()
    }

    // ========== LOCKING ==========

    pub fn is_locked(&self, id: ResourceId) -> bool {
        self.nodes.get(id.0).is_some_and(|node| node.lock.is_locked())
    }

    pub fn lock_holder(&self, id: ResourceId) -> Option<TaskId> {
        self.nodes.get(id.0).and_then(|node| node.lock.holder())
    }

    /// Acquire the exclusive lock on `id` for `task`
    pub fn lock(&mut self, id: ResourceId, task: TaskId) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.lock.acquire(task);
        }
    }

    /// Release the lock; only the holder may do this
    pub fn unlock(&mut self, id: ResourceId, task: TaskId) -> IoResult<()> {
        let node = self.nodes.get_mut(id.0).ok_or(IoError::NoSuchResource)?;
        if node.lock.release(task) {
            Ok(())
        } else {
            log::warn!("{} tried to unlock {} held by {:?}", task, id, node.lock.holder());
            Err(IoError::NotHolder(id))
        }
    }

    /// Drop every lock `task` holds, returning the resources it held
    pub fn release_all(&mut self, task: TaskId) -> Vec<ResourceId> {
        let mut released = Vec::new();
        for (key, node) in self.nodes.iter_mut() {
            if node.lock.release(task) {
                released.push(ResourceId(key));
            }
        }
        released
    }

    // ========== HANDLES ==========

    pub fn open(&mut self, id: ResourceId, flags: OpenFlags) -> IoResult<HandleId> {
        let node = self.nodes.get_mut(id.0).ok_or(IoError::NoSuchResource)?;
        node.resource.opened(flags);
        node.handles += 1;
        Ok(HandleId(self.handles.insert(Handle::new(id, flags))))
    }

    /// Close a handle; a transient resource goes with its last handle
    pub fn close(&mut self, handle: HandleId) -> IoResult<Handle> {
        let closed = self.handles.try_remove(handle.0).ok_or(IoError::BadHandle)?;
        let id = closed.resource;
        let released = match self.nodes.get_mut(id.0) {
            Some(node) => {
                node.resource.closed(closed.flags);
                node.handles = node.handles.saturating_sub(1);
                node.transient && node.handles == 0
            }
            None => false,
        };
        if released {
            self.nodes.remove(id.0);
            log::trace!("freed {} with its last handle", id);
        }
        Ok(closed)
    }

    /// Number of open handles on `id`
    pub fn handles_on(&self, id: ResourceId) -> usize {
        self.nodes.get(id.0).map_or(0, |node| node.handles)
    }

    pub fn handle(&self, handle: HandleId) -> Option<&Handle> {
        self.handles.get(handle.0)
    }

    /// Resolve a handle to its resource
    pub fn resolve(&self, handle: HandleId) -> Option<(&Handle, &(dyn Resource + 'static))> {
        let h = self.handles.get(handle.0)?;
        let resource = self.get(h.resource)?;
        Some((h, resource))
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Read through a handle, advancing its cursor
    pub fn read(&mut self, handle: HandleId, buf: &mut [u8]) -> IoResult<usize> {
        let h = *self.handles.get(handle.0).ok_or(IoError::BadHandle)?;
        if !h.flags.contains(OpenFlags::READ) {
            return Err(IoError::PermissionDenied);
        }
        let node = self.nodes.get_mut(h.resource.0).ok_or(IoError::NoSuchResource)?;
        let count = node.resource.read(&h, buf)?;
        if let Some(h) = self.handles.get_mut(handle.0) {
            h.offset += count as u64;
        }
        Ok(count)
    }

    /// Write through a handle, advancing its cursor
    pub fn write(&mut self, handle: HandleId, data: &[u8]) -> IoResult<usize> {
        let h = *self.handles.get(handle.0).ok_or(IoError::BadHandle)?;
        if !h.flags.contains(OpenFlags::WRITE) {
            return Err(IoError::PermissionDenied);
        }
        let node = self.nodes.get_mut(h.resource.0).ok_or(IoError::NoSuchResource)?;
        let count = node.resource.write(&h, data)?;
        if let Some(h) = self.handles.get_mut(handle.0) {
            h.offset += count as u64;
        }
        Ok(count)
    }

    pub fn call(&mut self, handle: HandleId, request: IoCall) -> IoResult<IoReply> {
        let h = *self.handles.get(handle.0).ok_or(IoError::BadHandle)?;
        let node = self.nodes.get_mut(h.resource.0).ok_or(IoError::NoSuchResource)?;
        node.resource.call(&h, request)
    }
}

impl std::fmt::Debug for ResourceTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceTable")
            .field("resources", &self.nodes.len())
            .field("handles", &self.handles.len())
            .finish()
    }
}
