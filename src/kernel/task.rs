//! Task abstraction
//!
//! A Task is the schedulable unit. While suspended it owns exactly one
//! [`Blocker`]; the blocker is dropped the moment the task resumes or is
//! cancelled. Finished tasks stay in the table, exit status readable, until
//! they are reaped.

use super::blocker::{Blocker, WakeOutput};
use serde::Serialize;
use std::collections::BTreeMap;

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Task lifecycle state
///
/// ```text
/// Runnable <-> Blocked
///     \          /
///      Canceled  --reap-->  Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskState {
    /// Ready to run
    Runnable,
    /// Suspended on a blocker
    Blocked,
    /// Finished (exited or killed); exit status is readable until reaped
    Canceled,
    /// Reaped. Only ever seen on the value returned by `reap`
    Terminated,
}

impl TaskState {
    /// Whether the task has stopped running for good
    pub fn is_finished(self) -> bool {
        matches!(self, TaskState::Canceled | TaskState::Terminated)
    }
}

/// How a task finished
///
/// Both variants leave the task in [`TaskState::Canceled`]; the status keeps
/// "exited on its own" apart from "killed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitStatus {
    /// The task called exit with this code
    Exited(i32),
    /// The task was cancelled with this exit value
    Canceled(i32),
}

impl ExitStatus {
    /// The exit value, regardless of how the task finished
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Exited(code) | ExitStatus::Canceled(code) => code,
        }
    }

    pub fn was_canceled(self) -> bool {
        matches!(self, ExitStatus::Canceled(_))
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exited({})", code),
            ExitStatus::Canceled(code) => write!(f, "canceled({})", code),
        }
    }
}

/// A schedulable task
#[derive(Debug)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    /// Spawning task, if any
    pub parent: Option<TaskId>,
    state: TaskState,
    /// Present iff state is Blocked
    blocker: Option<Blocker>,
    /// Output slot written by the blocker's unblock action
    wake: Option<WakeOutput>,
    exit: Option<ExitStatus>,
}

impl Task {
    pub fn new(id: TaskId, name: impl Into<String>, parent: Option<TaskId>) -> Self {
        Self {
            id,
            name: name.into(),
            parent,
            state: TaskState::Runnable,
            blocker: None,
            wake: None,
            exit: None,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn blocker(&self) -> Option<&Blocker> {
        self.blocker.as_ref()
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit
    }

    /// Peek at the pending wake output without consuming it
    pub fn wake(&self) -> Option<&WakeOutput> {
        self.wake.as_ref()
    }

    pub fn is_alive(&self) -> bool {
        !self.state.is_finished()
    }

    pub(crate) fn attach(&mut self, blocker: Blocker) {
        assert_eq!(
            self.state,
            TaskState::Runnable,
            "{} cannot block while {:?}",
            self.id,
            self.state
        );
        assert!(self.blocker.is_none(), "{} already owns a blocker", self.id);
        self.wake = None;
        self.blocker = Some(blocker);
        self.state = TaskState::Blocked;
    }

    pub(crate) fn detach(&mut self) -> Option<Blocker> {
        self.blocker.take()
    }

    pub(crate) fn resume(&mut self, output: WakeOutput) {
        debug_assert!(self.blocker.is_none());
        self.wake = Some(output);
        self.state = TaskState::Runnable;
    }

    pub(crate) fn take_wake(&mut self) -> Option<WakeOutput> {
        self.wake.take()
    }

    /// Move to Canceled, dropping any blocker without running its unblock
    /// action. The first recorded status wins.
    pub(crate) fn finish(&mut self, status: ExitStatus) -> bool {
        if self.state.is_finished() {
            return false;
        }
        self.blocker = None;
        self.wake = None;
        self.exit = Some(status);
        self.state = TaskState::Canceled;
        true
    }

    pub(crate) fn terminate(&mut self) {
        debug_assert_eq!(self.state, TaskState::Canceled);
        self.state = TaskState::Terminated;
    }
}

/// The task arena, iterated in ascending id order
#[derive(Debug, Default)]
pub struct TaskTable {
    tasks: BTreeMap<TaskId, Task>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task: Task) {
        self.tasks.insert(task.id, task);
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        self.tasks.remove(&id)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.tasks.get(&id).map(Task::state)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.tasks.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
