//! The kernel - tasks, blocking, and the resources they wait on
//!
//! Everything a task can wait for is expressed as a [`Blocker`]. The
//! [`Scheduler`] polls blockers in evaluation passes and resumes tasks
//! whose condition holds; [`Kernel`] layers restartable syscalls and
//! device interrupts on top.

pub mod blocker;
pub mod clock;
pub mod config;
pub mod pipe;
pub mod resource;
pub mod scheduler;
pub mod socket;
pub mod syscall;
pub mod task;
pub mod terminal;
pub mod trace;


pub use blocker::{Blocker, BlockerKind, SelectEntry, WakeOutput};
pub use clock::{Clock, Tick};
pub use config::{ConfigError, PassOrder, SchedulerConfig};
pub use pipe::Pipe;
pub use resource::{
    Handle, HandleId, IoCall, IoError, IoReply, IoResult, NodeLock, OpenFlags, Resource,
    ResourceId, ResourceTable, SelectEvents,
};
pub use scheduler::{PassReport, SchedError, SchedResult, Scheduler};
pub use socket::{Connection, ConnectionState, Listener};
pub use syscall::{Kernel, SysStatus, SyscallError, SyscallResult};
pub use task::{ExitStatus, Task, TaskId, TaskState};
pub use terminal::Terminal;
pub use trace::{SchedEvent, SchedEventKind, SchedulerStats, Tracer};

use std::cell::RefCell;

thread_local! {
    /// The global kernel instance
    static KERNEL: RefCell<Kernel> = RefCell::new(Kernel::default());
}

/// Run `f` against the global kernel
pub fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    KERNEL.with(|k| f(&mut k.borrow_mut()))
}

/// Replace the global kernel with a fresh one
pub fn boot(config: SchedulerConfig) {
    log::info!("booting kernel: {:?}", config);
    with_kernel(|k| *k = Kernel::new(config));
}

/// Spawn a task on the global kernel
pub fn spawn(name: &str, parent: Option<TaskId>) -> SyscallResult<TaskId> {
    with_kernel(|k| k.sys_spawn(name, parent))
}

pub fn read(task: TaskId, handle: HandleId, buf: &mut [u8]) -> SyscallResult<SysStatus<usize>> {
    with_kernel(|k| k.sys_read(task, handle, buf))
}

pub fn write(task: TaskId, handle: HandleId, data: &[u8]) -> SyscallResult<SysStatus<usize>> {
    with_kernel(|k| k.sys_write(task, handle, data))
}

pub fn close(handle: HandleId) -> SyscallResult<()> {
    with_kernel(|k| k.sys_close(handle))
}

pub fn pipe(task: TaskId) -> SyscallResult<(HandleId, HandleId)> {
    with_kernel(|k| k.sys_pipe(task))
}

pub fn sleep(task: TaskId, ticks: u64) -> SyscallResult<SysStatus<Tick>> {
    with_kernel(|k| k.sys_sleep(task, ticks))
}

pub fn wait(task: TaskId, child: TaskId) -> SyscallResult<SysStatus<ExitStatus>> {
    with_kernel(|k| k.sys_wait(task, child))
}

pub fn exit(task: TaskId, code: i32) -> SyscallResult<()> {
    with_kernel(|k| k.sys_exit(task, code))
}

pub fn kill(task: TaskId, exit_value: i32) -> SyscallResult<()> {
    with_kernel(|k| k.sys_kill(task, exit_value))
}

/// Advance global time
pub fn tick(ticks: u64) -> Option<PassReport> {
    with_kernel(|k| k.tick(ticks))
}

/// Deliver a hardware interrupt
pub fn interrupt(irq: u8) -> PassReport {
    with_kernel(|k| k.interrupt(irq))
}
