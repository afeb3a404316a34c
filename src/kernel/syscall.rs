//! System call interface
//!
//! The blocking boundary between task code and the scheduler. Every call
//! that can wait is restartable:
//!
//! 1. The first call checks the condition. If it already holds, the call
//!    completes immediately. Otherwise it blocks the task on the matching
//!    [`Blocker`] and returns [`SysStatus::Blocked`].
//! 2. An evaluation pass later finds the condition true, runs the unblock
//!    action (taking the resource lock where there is one) and makes the
//!    task runnable with a wake output.
//! 3. The task re-issues the same call. It consumes the wake output,
//!    performs the operation, releases the lock and returns
//!    [`SysStatus::Ready`].
//!
//! Devices are also wired in here: interrupts are routed to the devices
//! on that line and followed by an evaluation pass.

use super::blocker::{Blocker, WakeOutput};
use super::clock::Tick;
use super::config::SchedulerConfig;
use super::pipe::Pipe;
use super::resource::{
    Handle, HandleId, IoCall, IoError, IoReply, IoResult, OpenFlags, Resource, ResourceId,
    ResourceTable, SelectEvents,
};
use super::scheduler::{PassReport, SchedError, Scheduler};
use super::socket::{Connection, ConnectionState, Listener};
use super::task::{ExitStatus, TaskId, TaskState};
use crate::devices::{Device, DeviceAddress, DeviceDriver, DriverRegistry};
use std::collections::{BTreeMap, HashMap};

/// Outcome of a blocking syscall
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysStatus<T> {
    /// The call completed
    Ready(T),
    /// The task is blocked; re-issue the call once it is runnable
    Blocked,
}

impl<T> SysStatus<T> {
    pub fn is_blocked(&self) -> bool {
        matches!(self, SysStatus::Blocked)
    }

    pub fn ready(self) -> Option<T> {
        match self {
            SysStatus::Ready(value) => Some(value),
            SysStatus::Blocked => None,
        }
    }
}

/// Error types for syscalls
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyscallError {
    /// Handle is not open
    BadHandle,
    NoSuchTask(TaskId),
    NoSuchResource,
    /// The calling task has finished
    Canceled(TaskId),
    /// Non-blocking handle and the condition does not hold
    WouldBlock,
    BrokenPipe,
    ConnectionRefused,
    PermissionDenied,
    NotSupported,
    InvalidArgument,
    Sched(SchedError),
    Io(IoError),
}

impl std::fmt::Display for SyscallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyscallError::BadHandle => write!(f, "bad handle"),
            SyscallError::NoSuchTask(id) => write!(f, "no such task: {}", id),
            SyscallError::NoSuchResource => write!(f, "no such resource"),
            SyscallError::Canceled(id) => write!(f, "{} has finished", id),
            SyscallError::WouldBlock => write!(f, "would block"),
            SyscallError::BrokenPipe => write!(f, "broken pipe"),
            SyscallError::ConnectionRefused => write!(f, "connection refused"),
            SyscallError::PermissionDenied => write!(f, "permission denied"),
            SyscallError::NotSupported => write!(f, "operation not supported"),
            SyscallError::InvalidArgument => write!(f, "invalid argument"),
            SyscallError::Sched(e) => write!(f, "scheduler error: {}", e),
            SyscallError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for SyscallError {}

impl From<IoError> for SyscallError {
    fn from(e: IoError) -> Self {
        match e {
            IoError::WouldBlock => SyscallError::WouldBlock,
            IoError::BrokenPipe => SyscallError::BrokenPipe,
            IoError::ConnectionRefused => SyscallError::ConnectionRefused,
            IoError::BadHandle => SyscallError::BadHandle,
            IoError::NoSuchResource => SyscallError::NoSuchResource,
            IoError::PermissionDenied => SyscallError::PermissionDenied,
            IoError::NotSupported => SyscallError::NotSupported,
            IoError::InvalidArgument => SyscallError::InvalidArgument,
            other => SyscallError::Io(other),
        }
    }
}

impl From<SchedError> for SyscallError {
    fn from(e: SchedError) -> Self {
        match e {
            SchedError::NoSuchTask(id) => SyscallError::NoSuchTask(id),
            other => SyscallError::Sched(other),
        }
    }
}

/// Result type for syscalls
pub type SyscallResult<T> = Result<T, SyscallError>;

/// Where a task stands when it (re-)enters a blocking call
enum Resume {
    /// No wake pending: start from scratch
    Fresh,
    /// Re-issued before a pass resumed it
    Blocked,
    /// Resumed by a pass with this output
    Woken(WakeOutput),
}

#[derive(Debug, Clone, Copy)]
enum Transfer {
    Read,
    Write,
}

impl Transfer {
    fn access(self) -> OpenFlags {
        match self {
            Transfer::Read => OpenFlags::READ,
            Transfer::Write => OpenFlags::WRITE,
        }
    }

    fn blocker(self, handle: HandleId) -> Blocker {
        match self {
            Transfer::Read => Blocker::Read { handle },
            Transfer::Write => Blocker::Write { handle },
        }
    }
}

/// The kernel: scheduler, devices, and the syscall surface over them
pub struct Kernel {
    scheduler: Scheduler,
    drivers: DriverRegistry,
    /// Installed device resources by interrupt line
    irq_routes: BTreeMap<u8, Vec<ResourceId>>,
    /// Client handles of connects still waiting for the peer
    connecting: HashMap<TaskId, HandleId>,
}

impl Kernel {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            scheduler: Scheduler::new(config),
            drivers: DriverRegistry::new(),
            irq_routes: BTreeMap::new(),
            connecting: HashMap::new(),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn resources(&self) -> &ResourceTable {
        self.scheduler.resources()
    }

    // ========== HELPERS ==========

    fn resume(&mut self, task: TaskId) -> SyscallResult<Resume> {
        match self.scheduler.state(task) {
            None => Err(SyscallError::NoSuchTask(task)),
            Some(TaskState::Blocked) => Ok(Resume::Blocked),
            Some(TaskState::Runnable) => Ok(match self.scheduler.take_wake(task) {
                Some(wake) => Resume::Woken(wake),
                None => Resume::Fresh,
            }),
            Some(TaskState::Canceled) | Some(TaskState::Terminated) => {
                Err(SyscallError::Canceled(task))
            }
        }
    }

    /// Drop a wake output the current call has no use for
    fn discard(&mut self, task: TaskId, wake: WakeOutput) {
        log::warn!("{} discarding stale wake {:?}", task, wake);
        match wake {
            WakeOutput::Acquired(resource) => {
                let _ = self.scheduler.resources_mut().unlock(resource, task);
            }
            WakeOutput::Connected(_) => self.drop_pending_connect(task),
            _ => {}
        }
    }

    fn require_task(&self, task: TaskId) -> SyscallResult<()> {
        match self.scheduler.state(task) {
            None => Err(SyscallError::NoSuchTask(task)),
            Some(state) if state.is_finished() => Err(SyscallError::Canceled(task)),
            Some(_) => Ok(()),
        }
    }

    /// Look up `handle` and check its access mode. On failure any wake the
    /// task brought along is discarded so a lock it carries is not leaked.
    fn checked_handle(
        &mut self,
        task: TaskId,
        handle: HandleId,
        access: OpenFlags,
        woken: Option<WakeOutput>,
    ) -> SyscallResult<Handle> {
        let checked = match self.scheduler.resources().handle(handle) {
            None => Err(SyscallError::BadHandle),
            Some(h) if !h.flags.contains(access) => Err(SyscallError::PermissionDenied),
            Some(h) => Ok(*h),
        };
        if checked.is_err() {
            if let Some(wake) = woken {
                self.discard(task, wake);
            }
        }
        checked
    }

    /// Get `task` holding the lock on `resource`, either from the wake that
    /// resumed it or by evaluating `blocker` now
    ///
    /// Returns false when the task had to block.
    fn acquire(
        &mut self,
        task: TaskId,
        woken: Option<WakeOutput>,
        resource: ResourceId,
        blocker: Blocker,
        nonblock: bool,
    ) -> SyscallResult<bool> {
        match woken {
            Some(WakeOutput::Acquired(id)) if id == resource => return Ok(true),
            Some(stale) => self.discard(task, stale),
            None => {}
        }
        match self.scheduler.poll_now(task, blocker) {
            Ok(WakeOutput::Acquired(_)) => Ok(true),
            Ok(_) => Err(SyscallError::BadHandle),
            Err(_) if nonblock => Err(SyscallError::WouldBlock),
            Err(blocker) => {
                self.scheduler.block(task, blocker)?;
                Ok(false)
            }
        }
    }

    /// Release the lock after the operation and map its result. An
    /// operation that found nothing to do after all blocks again.
    fn complete<T>(
        &mut self,
        task: TaskId,
        resource: ResourceId,
        result: IoResult<T>,
        retry: Blocker,
        nonblock: bool,
    ) -> SyscallResult<SysStatus<T>> {
        self.scheduler.resources_mut().unlock(resource, task)?;
        match result {
            Ok(value) => Ok(SysStatus::Ready(value)),
            Err(IoError::WouldBlock) if !nonblock => {
                self.scheduler.block(task, retry)?;
                Ok(SysStatus::Blocked)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn transfer(
        &mut self,
        task: TaskId,
        handle: HandleId,
        direction: Transfer,
        op: impl FnOnce(&mut ResourceTable) -> IoResult<usize>,
    ) -> SyscallResult<SysStatus<usize>> {
        let woken = match self.resume(task)? {
            Resume::Blocked => return Ok(SysStatus::Blocked),
            Resume::Woken(wake) => Some(wake),
            Resume::Fresh => None,
        };
        let h = self.checked_handle(task, handle, direction.access(), woken)?;
        let nonblock = h.flags.contains(OpenFlags::NONBLOCK);
        if !self.acquire(task, woken, h.resource, direction.blocker(handle), nonblock)? {
            return Ok(SysStatus::Blocked);
        }
        let result = op(self.scheduler.resources_mut());
        self.complete(task, h.resource, result, direction.blocker(handle), nonblock)
    }

    // ========== TASKS ==========

    pub fn sys_spawn(&mut self, name: &str, parent: Option<TaskId>) -> SyscallResult<TaskId> {
        if let Some(parent) = parent {
            self.require_task(parent)?;
        }
        Ok(self.scheduler.spawn(name, parent))
    }

    /// Finish the calling task normally
    pub fn sys_exit(&mut self, task: TaskId, code: i32) -> SyscallResult<()> {
        self.scheduler.exit(task, code)?;
        self.drop_pending_connect(task);
        Ok(())
    }

    /// Cancel `task` regardless of what it is doing
    pub fn sys_kill(&mut self, task: TaskId, exit_value: i32) -> SyscallResult<()> {
        self.scheduler.cancel(task, exit_value)?;
        self.drop_pending_connect(task);
        Ok(())
    }

    fn drop_pending_connect(&mut self, task: TaskId) {
        if let Some(client) = self.connecting.remove(&task) {
            self.abandon_connect(client);
        }
    }

    /// Close a client end nobody will collect, taking its connection off
    /// the listener's backlog if it is still queued
    fn abandon_connect(&mut self, client: HandleId) {
        let resources = self.scheduler.resources_mut();
        if let Some(conn) = resources.handle(client).map(|h| h.resource) {
            let listener = resources.get_as::<Connection>(conn).map(|c| c.listener);
            if let Some(queue) = listener.and_then(|l| resources.get_as_mut::<Listener>(l)) {
                queue.withdraw(conn);
            }
        }
        let _ = resources.close(client);
    }

    /// Wait for `child` to finish, then reap it
    pub fn sys_wait(&mut self, task: TaskId, child: TaskId) -> SyscallResult<SysStatus<ExitStatus>> {
        let wake = match self.resume(task)? {
            Resume::Blocked => return Ok(SysStatus::Blocked),
            Resume::Woken(WakeOutput::Exited { task: done, status }) if done == child => {
                WakeOutput::Exited { task: done, status }
            }
            Resume::Woken(WakeOutput::Closed) => return Err(SyscallError::NoSuchTask(child)),
            Resume::Woken(stale) => {
                self.discard(task, stale);
                return self.start_wait(task, child);
            }
            Resume::Fresh => return self.start_wait(task, child),
        };
        self.finish_wait(child, wake)
    }

    fn start_wait(&mut self, task: TaskId, child: TaskId) -> SyscallResult<SysStatus<ExitStatus>> {
        if child == task {
            return Err(SchedError::SelfWait(task).into());
        }
        if self.scheduler.state(child).is_none() {
            return Err(SyscallError::NoSuchTask(child));
        }
        match self.scheduler.poll_now(task, Blocker::Wait { task: child }) {
            Ok(wake) => self.finish_wait(child, wake),
            Err(blocker) => {
                self.scheduler.block(task, blocker)?;
                Ok(SysStatus::Blocked)
            }
        }
    }

    fn finish_wait(&mut self, child: TaskId, wake: WakeOutput) -> SyscallResult<SysStatus<ExitStatus>> {
        let WakeOutput::Exited { status, .. } = wake else {
            return Err(SyscallError::NoSuchTask(child));
        };
        match self.scheduler.reap(child) {
            Ok(_) => {}
            // Another waiter still needs it; the last one reaps
            Err(SchedError::StillAwaited(_)) => {}
            Err(e) => log::debug!("wait on {} could not reap: {}", child, e),
        }
        Ok(SysStatus::Ready(status))
    }

    /// Sleep for `ticks`; returns the tick the task woke at
    pub fn sys_sleep(&mut self, task: TaskId, ticks: u64) -> SyscallResult<SysStatus<Tick>> {
        match self.resume(task)? {
            Resume::Blocked => return Ok(SysStatus::Blocked),
            Resume::Woken(WakeOutput::Elapsed(at)) => return Ok(SysStatus::Ready(at)),
            Resume::Woken(stale) => self.discard(task, stale),
            Resume::Fresh => {}
        }
        let now = self.scheduler.now();
        if ticks == 0 {
            return Ok(SysStatus::Ready(now));
        }
        self.scheduler.block(task, Blocker::Time { wakeup: now.after(ticks) })?;
        Ok(SysStatus::Blocked)
    }

    // ========== HANDLES ==========

    /// Register a resource with the kernel
    pub fn add_resource<R: Resource>(&mut self, resource: R) -> ResourceId {
        self.scheduler.resources_mut().insert(resource)
    }

    pub fn sys_open(&mut self, task: TaskId, resource: ResourceId, flags: OpenFlags) -> SyscallResult<HandleId> {
        self.require_task(task)?;
        Ok(self.scheduler.resources_mut().open(resource, flags)?)
    }

    /// Close a handle. Closing the last handle on a listener shuts it
    /// down and refuses every connection still queued on it.
    pub fn sys_close(&mut self, handle: HandleId) -> SyscallResult<()> {
        let resources = self.scheduler.resources_mut();
        let id = resources.handle(handle).ok_or(SyscallError::BadHandle)?.resource;
        if resources.handles_on(id) == 1 {
            if let Some(listener) = resources.get_as_mut::<Listener>(id) {
                let refused = listener.shutdown();
                log::debug!("{} shut down, refusing {} queued", id, refused.len());
                for conn in refused {
                    if let Some(connection) = resources.get_as_mut::<Connection>(conn) {
                        connection.refuse();
                    }
                }
            }
        }
        resources.close(handle)?;
        Ok(())
    }

    /// Create a pipe; returns (read end, write end)
    pub fn sys_pipe(&mut self, task: TaskId) -> SyscallResult<(HandleId, HandleId)> {
        self.require_task(task)?;
        let resources = self.scheduler.resources_mut();
        let pipe = resources.insert_transient(Pipe::default());
        let reader = resources.open(pipe, OpenFlags::READ)?;
        let writer = resources.open(pipe, OpenFlags::WRITE)?;
        Ok((reader, writer))
    }

    pub fn sys_read(&mut self, task: TaskId, handle: HandleId, buf: &mut [u8]) -> SyscallResult<SysStatus<usize>> {
        self.transfer(task, handle, Transfer::Read, |resources| resources.read(handle, buf))
    }

    pub fn sys_write(&mut self, task: TaskId, handle: HandleId, data: &[u8]) -> SyscallResult<SysStatus<usize>> {
        self.transfer(task, handle, Transfer::Write, |resources| resources.write(handle, data))
    }

    pub fn sys_ioctl(&mut self, handle: HandleId, request: IoCall) -> SyscallResult<IoReply> {
        Ok(self.scheduler.resources_mut().call(handle, request)?)
    }

    /// Wait until one of `entries` is ready; returns the first ready
    /// handle in list order and its events
    pub fn sys_select(
        &mut self,
        task: TaskId,
        entries: &[(HandleId, SelectEvents)],
    ) -> SyscallResult<SysStatus<(HandleId, SelectEvents)>> {
        match self.resume(task)? {
            Resume::Blocked => return Ok(SysStatus::Blocked),
            Resume::Woken(WakeOutput::Selected { handle, events }) => {
                return Ok(SysStatus::Ready((handle, events)));
            }
            Resume::Woken(stale) => self.discard(task, stale),
            Resume::Fresh => {}
        }
        if entries.is_empty() {
            return Err(SyscallError::InvalidArgument);
        }
        if entries
            .iter()
            .any(|(handle, _)| self.scheduler.resources().handle(*handle).is_none())
        {
            return Err(SyscallError::BadHandle);
        }
        match self.scheduler.poll_now(task, Blocker::select(entries.iter().copied())) {
            Ok(WakeOutput::Selected { handle, events }) => Ok(SysStatus::Ready((handle, events))),
            Ok(_) => Err(SyscallError::InvalidArgument),
            Err(blocker) => {
                self.scheduler.block(task, blocker)?;
                Ok(SysStatus::Blocked)
            }
        }
    }

    // ========== SOCKETS ==========

    /// Create a listener; returns a handle on it
    pub fn sys_listen(&mut self, task: TaskId, backlog: usize) -> SyscallResult<HandleId> {
        self.require_task(task)?;
        let resources = self.scheduler.resources_mut();
        let listener = resources.insert_transient(Listener::new(backlog));
        Ok(resources.open(listener, OpenFlags::READ)?)
    }

    /// Accept the next connection; returns the server end
    pub fn sys_accept(&mut self, task: TaskId, listener: HandleId) -> SyscallResult<SysStatus<HandleId>> {
        let woken = match self.resume(task)? {
            Resume::Blocked => return Ok(SysStatus::Blocked),
            Resume::Woken(wake) => Some(wake),
            Resume::Fresh => None,
        };
        let h = self.checked_handle(task, listener, OpenFlags::empty(), woken)?;
        if self.scheduler.resources().get_as::<Listener>(h.resource).is_none() {
            if let Some(wake) = woken {
                self.discard(task, wake);
            }
            return Err(SyscallError::NotSupported);
        }
        let nonblock = h.flags.contains(OpenFlags::NONBLOCK);
        let blocker = Blocker::Accept { listener };
        if !self.acquire(task, woken, h.resource, blocker.clone(), nonblock)? {
            return Ok(SysStatus::Blocked);
        }
        let result = self.take_connection(h.resource);
        self.complete(task, h.resource, result, blocker, nonblock)
    }

    fn take_connection(&mut self, listener: ResourceId) -> IoResult<HandleId> {
        let resources = self.scheduler.resources_mut();
        let queue = resources
            .get_as_mut::<Listener>(listener)
            .ok_or(IoError::NoSuchResource)?;
        let closed = queue.is_closed();
        let Some(conn) = queue.pop() else {
            return Err(if closed {
                IoError::ConnectionRefused
            } else {
                IoError::WouldBlock
            });
        };
        if let Some(connection) = resources.get_as_mut::<Connection>(conn) {
            connection.accept();
        }
        resources.open(conn, OpenFlags::RDWR | OpenFlags::SERVER)
    }

    /// Connect to a listener; returns the client end once accepted
    pub fn sys_connect(&mut self, task: TaskId, listener: HandleId) -> SyscallResult<SysStatus<HandleId>> {
        match self.resume(task)? {
            Resume::Blocked => return Ok(SysStatus::Blocked),
            Resume::Woken(WakeOutput::Connected(conn)) => return self.finish_connect(task, conn),
            Resume::Woken(stale) => self.discard(task, stale),
            Resume::Fresh => {}
        }
        let h = self.checked_handle(task, listener, OpenFlags::empty(), None)?;
        match self.scheduler.resources().get_as::<Listener>(h.resource) {
            None => return Err(SyscallError::NotSupported),
            Some(l) if l.is_closed() => return Err(SyscallError::ConnectionRefused),
            Some(_) => {}
        }

        let resources = self.scheduler.resources_mut();
        let conn = resources.insert_transient(Connection::new(h.resource));
        let client = resources.open(conn, OpenFlags::RDWR)?;
        let queued = match resources.get_as_mut::<Listener>(h.resource) {
            Some(l) => l.push(conn),
            None => Err(IoError::NoSuchResource),
        };
        if let Err(e) = queued {
            // Last handle: the connection goes with it
            resources.close(client)?;
            return Err(e.into());
        }

        if let Some(stale) = self.connecting.insert(task, client) {
            self.abandon_connect(stale);
        }
        self.scheduler.block(task, Blocker::Connect { connection: conn })?;
        Ok(SysStatus::Blocked)
    }

    fn finish_connect(&mut self, task: TaskId, conn: ResourceId) -> SyscallResult<SysStatus<HandleId>> {
        let client = self.connecting.remove(&task).ok_or(SyscallError::BadHandle)?;
        let state = self
            .scheduler
            .resources()
            .get_as::<Connection>(conn)
            .map(Connection::state);
        if state == Some(ConnectionState::Accepted) {
            return Ok(SysStatus::Ready(client));
        }
        self.scheduler.resources_mut().close(client)?;
        Err(SyscallError::ConnectionRefused)
    }

    // ========== DEVICES ==========

    pub fn register_driver(&mut self, driver: Box<dyn DeviceDriver>) {
        self.drivers.register(driver);
    }

    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }

    /// Add a device to the resource table and route its interrupt line
    pub fn install_device(&mut self, device: Box<dyn Device>) -> ResourceId {
        let irq = device.interrupt();
        let address = device.address();
        let id = self
            .scheduler
            .resources_mut()
            .insert_boxed(device.into_resource());
        self.irq_routes.entry(irq).or_default().push(id);
        log::info!("installed {} at {} on irq {}", address, id, irq);
        id
    }

    /// Instantiate the device at `address` with a registered driver
    pub fn probe(&mut self, address: DeviceAddress) -> SyscallResult<ResourceId> {
        let device = self.drivers.probe(address).ok_or(SyscallError::NotSupported)?;
        Ok(self.install_device(device))
    }

    /// Deliver an interrupt to every device on `irq`, then run a pass so
    /// tasks waiting on those devices see the new state
    pub fn interrupt(&mut self, irq: u8) -> PassReport {
        match self.irq_routes.get(&irq) {
            Some(routed) => {
                for id in routed {
                    let device = self
                        .scheduler
                        .resources_mut()
                        .get_mut(*id)
                        .and_then(|r| r.as_device_mut());
                    if let Some(device) = device {
                        device.handle_interrupt();
                    }
                }
            }
            None => log::debug!("spurious interrupt on irq {}", irq),
        }
        self.scheduler.evaluate_pass()
    }

    // ========== TIME ==========

    /// Advance the clock by `ticks`
    pub fn tick(&mut self, ticks: u64) -> Option<PassReport> {
        self.scheduler.advance(ticks)
    }

    pub fn run_pass(&mut self) -> PassReport {
        self.scheduler.evaluate_pass()
    }

    pub fn now(&self) -> Tick {
        self.scheduler.now()
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}
