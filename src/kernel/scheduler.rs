//! Blocking scheduler
//!
//! Owns the task table, the resource table and the clock, and funnels
//! every task state change through a handful of operations:
//!
//! - [`Scheduler::block`] suspends a task on a [`Blocker`]
//! - [`Scheduler::evaluate_pass`] polls every blocked task's predicate and
//!   resumes the ones that hold
//! - [`Scheduler::cancel`] / [`Scheduler::exit`] finish a task
//! - [`Scheduler::reap`] removes a finished task
//!
//! Readiness is discovered by polling: nothing pushes wakeups into the
//! scheduler. A pass costs one predicate per blocked task (plus one per
//! handle for selects). Passes run when the caller decides (a tick, an
//! interrupt, a child exiting); correctness only needs "eventually again".

use super::blocker::{Blocker, Readiness, UnblockContext, WakeOutput};
use super::clock::{Clock, Tick};
use super::config::{PassOrder, SchedulerConfig};
use super::resource::{ResourceId, ResourceTable};
use super::task::{ExitStatus, Task, TaskId, TaskState, TaskTable};
use super::trace::{SchedEvent, SchedEventKind, SchedulerStats, Tracer};
use std::collections::VecDeque;

/// Error types for scheduler operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    NoSuchTask(TaskId),
    /// Reap of a task that is still running or blocked
    NotFinished(TaskId),
    /// Reap of a task a blocked waiter still needs
    StillAwaited(TaskId),
    /// A task waiting on itself would never wake
    SelfWait(TaskId),
}

impl std::fmt::Display for SchedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedError::NoSuchTask(id) => write!(f, "no such task: {}", id),
            SchedError::NotFinished(id) => write!(f, "{} has not finished", id),
            SchedError::StillAwaited(id) => write!(f, "{} is still awaited", id),
            SchedError::SelfWait(id) => write!(f, "{} cannot wait on itself", id),
        }
    }
}

impl std::error::Error for SchedError {}

/// Result type for scheduler operations
pub type SchedResult<T> = Result<T, SchedError>;

/// Outcome of one evaluation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Pass number, starting at 1
    pub pass: u64,
    /// Predicates evaluated
    pub evaluated: usize,
    /// Resumed tasks, in the order they were resumed
    pub unblocked: Vec<TaskId>,
}

pub struct Scheduler {
    config: SchedulerConfig,
    tasks: TaskTable,
    resources: ResourceTable,
    clock: Clock,
    /// Blocked tasks in the order they blocked
    block_queue: VecDeque<TaskId>,
    next_task_id: u64,
    tracer: Tracer,
    stats: SchedulerStats,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let tracer = Tracer::new(config.trace_capacity, config.trace);
        Self {
            config,
            tasks: TaskTable::new(),
            resources: ResourceTable::new(),
            clock: Clock::new(),
            block_queue: VecDeque::new(),
            next_task_id: 1,
            tracer,
            stats: SchedulerStats::new(),
        }
    }

    fn trace(&mut self, task: TaskId, kind: SchedEventKind) {
        self.tracer.record(SchedEvent {
            tick: self.clock.now(),
            pass: self.stats.passes,
            task,
            kind,
        });
    }

    // ========== TASK LIFECYCLE ==========

    /// Create a runnable task
    pub fn spawn(&mut self, name: &str, parent: Option<TaskId>) -> TaskId {
        let id = TaskId(self.next_task_id);
        self.next_task_id += 1;
        self.tasks.insert(Task::new(id, name, parent));
        self.stats.spawned += 1;
        self.trace(id, SchedEventKind::Spawn);
        log::debug!("spawned {} ({})", id, name);
        id
    }

    /// Suspend `task` on `blocker`
    ///
    /// A task only ever blocks itself, from its own context. Blocking a
    /// task that is not runnable is a protocol violation and panics.
    pub fn block(&mut self, task: TaskId, blocker: Blocker) -> SchedResult<()> {
        if let Blocker::Wait { task: target } = blocker {
            if target == task {
                return Err(SchedError::SelfWait(task));
            }
            if !self.tasks.contains(target) {
                return Err(SchedError::NoSuchTask(target));
            }
        }

        let kind = blocker.kind();
        let t = self.tasks.get_mut(task).ok_or(SchedError::NoSuchTask(task))?;
        t.attach(blocker);

        self.block_queue.push_back(task);
        self.stats.record_block(self.block_queue.len());
        self.trace(task, SchedEventKind::Block(kind));
        log::debug!("{} blocked on {}", task, kind);
        Ok(())
    }

    /// Poll every blocked task once, in the configured order, resuming
    /// those whose condition holds
    pub fn evaluate_pass(&mut self) -> PassReport {
        let order = self.pass_order();
        let mut report = PassReport {
            pass: self.stats.passes + 1,
            ..PassReport::default()
        };

        for id in order {
            let ready = {
                let Some(blocker) = self.tasks.get(id).and_then(Task::blocker) else {
                    continue;
                };
                let ctx = Readiness {
                    now: self.clock.now(),
                    resources: &self.resources,
                    tasks: &self.tasks,
                };
                report.evaluated += 1;
                blocker.can_unblock(&ctx)
            };
            if ready {
                self.unblock(id);
                report.unblocked.push(id);
            }
        }

        self.stats.record_pass(report.evaluated);
        if !report.unblocked.is_empty() {
            log::trace!("pass {} resumed {:?}", report.pass, report.unblocked);
        }
        report
    }

    /// Evaluate `blocker` for a running `task` without suspending it
    ///
    /// If the condition already holds the unblock action runs right away
    /// and its output is returned; otherwise the blocker is handed back so
    /// the caller can block on it. A lock that a blocked task could claim
    /// on the next pass is left to that pass, so callers never overtake
    /// the pass order.
    pub fn poll_now(&mut self, task: TaskId, blocker: Blocker) -> Result<WakeOutput, Blocker> {
        let ready = blocker.can_unblock(&Readiness {
            now: self.clock.now(),
            resources: &self.resources,
            tasks: &self.tasks,
        });
        if !ready {
            return Err(blocker);
        }
        if let Some(resource) = blocker.lock_target(&self.resources) {
            if self.has_ready_claimant(task, resource) {
                return Err(blocker);
            }
        }
        Ok(blocker.on_unblock(
            task,
            UnblockContext {
                now: self.clock.now(),
                resources: &mut self.resources,
                tasks: &self.tasks,
            },
        ))
    }

    /// Whether a blocked task other than `task` could claim `resource` now
    fn has_ready_claimant(&self, task: TaskId, resource: ResourceId) -> bool {
        let ctx = Readiness {
            now: self.clock.now(),
            resources: &self.resources,
            tasks: &self.tasks,
        };
        self.block_queue
            .iter()
            .filter(|id| **id != task)
            .filter_map(|id| self.tasks.get(*id).and_then(Task::blocker))
            .any(|b| b.lock_target(&self.resources) == Some(resource) && b.can_unblock(&ctx))
    }

    fn unblock(&mut self, id: TaskId) {
        let Some(blocker) = self.tasks.get_mut(id).and_then(Task::detach) else {
            return;
        };
        let kind = blocker.kind();
        let output = blocker.on_unblock(
            id,
            UnblockContext {
                now: self.clock.now(),
                resources: &mut self.resources,
                tasks: &self.tasks,
            },
        );
        if let Some(task) = self.tasks.get_mut(id) {
            task.resume(output);
        }
        self.block_queue.retain(|t| *t != id);
        self.stats.record_unblock(kind);
        self.trace(id, SchedEventKind::Unblock(kind));
        log::trace!("{} unblocked ({}): {:?}", id, kind, output);
    }

    /// Tasks a pass would visit, in visiting order
    pub fn pass_order(&self) -> Vec<TaskId> {
        match self.config.pass_order {
            PassOrder::TaskId => self
                .tasks
                .iter()
                .filter(|t| t.state() == TaskState::Blocked)
                .map(|t| t.id)
                .collect(),
            PassOrder::BlockOrder => self.block_queue.iter().copied().collect(),
        }
    }

    /// Force a task to finish regardless of what it is waiting for
    ///
    /// The blocker, if any, is dropped without its unblock action. Waiters
    /// see the task finished on their next pass. Cancelling a finished
    /// task changes nothing.
    pub fn cancel(&mut self, task: TaskId, exit_value: i32) -> SchedResult<()> {
        let t = self.tasks.get_mut(task).ok_or(SchedError::NoSuchTask(task))?;
        if !t.finish(ExitStatus::Canceled(exit_value)) {
            return Ok(());
        }
        self.block_queue.retain(|t| *t != task);
        self.release_locks(task);
        self.stats.cancels += 1;
        self.trace(task, SchedEventKind::Cancel);
        log::debug!("{} canceled with {}", task, exit_value);
        Ok(())
    }

    /// Finish a running task normally
    pub fn exit(&mut self, task: TaskId, code: i32) -> SchedResult<()> {
        let t = self.tasks.get_mut(task).ok_or(SchedError::NoSuchTask(task))?;
        assert_ne!(
            t.state(),
            TaskState::Blocked,
            "{} cannot exit while blocked",
            task
        );
        if !t.finish(ExitStatus::Exited(code)) {
            return Ok(());
        }
        self.release_locks(task);
        self.stats.exits += 1;
        self.trace(task, SchedEventKind::Exit);
        log::debug!("{} exited with {}", task, code);
        Ok(())
    }

    // A finished task never reaches its I/O completion path
    fn release_locks(&mut self, task: TaskId) {
        let released = self.resources.release_all(task);
        if !released.is_empty() {
            log::debug!("released locks of {}: {:?}", task, released);
        }
    }

    /// Remove a finished task, returning it in the Terminated state
    pub fn reap(&mut self, task: TaskId) -> SchedResult<Task> {
        let state = self.tasks.state(task).ok_or(SchedError::NoSuchTask(task))?;
        if state != TaskState::Canceled {
            return Err(SchedError::NotFinished(task));
        }
        let awaited = self
            .tasks
            .iter()
            .any(|w| matches!(w.blocker(), Some(Blocker::Wait { task: target }) if *target == task));
        if awaited {
            log::warn!("refusing to reap {}: a waiter has not observed it yet", task);
            return Err(SchedError::StillAwaited(task));
        }

        let mut reaped = self.tasks.remove(task).ok_or(SchedError::NoSuchTask(task))?;
        reaped.terminate();
        self.stats.reaps += 1;
        self.trace(task, SchedEventKind::Reap);
        log::debug!("reaped {}", task);
        Ok(reaped)
    }

    // ========== TIME ==========

    pub fn now(&self) -> Tick {
        self.clock.now()
    }

    /// Advance the clock; runs a pass if configured to
    pub fn advance(&mut self, ticks: u64) -> Option<PassReport> {
        self.clock.advance(ticks);
        if self.config.evaluate_on_tick {
            Some(self.evaluate_pass())
        } else {
            None
        }
    }

    // ========== QUERIES ==========

    pub fn state(&self, task: TaskId) -> Option<TaskState> {
        self.tasks.state(task)
    }

    pub fn task(&self, task: TaskId) -> Option<&Task> {
        self.tasks.get(task)
    }

    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    pub fn blocked_tasks(&self) -> Vec<TaskId> {
        self.pass_order()
    }

    pub fn children(&self, parent: TaskId) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.parent == Some(parent))
            .map(|t| t.id)
            .collect()
    }

    /// Consume the output left by the unblock action
    pub fn take_wake(&mut self, task: TaskId) -> Option<WakeOutput> {
        self.tasks.get_mut(task).and_then(Task::take_wake)
    }

    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut ResourceTable {
        &mut self.resources
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut Tracer {
        &mut self.tracer
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::pipe::Pipe;
    use crate::kernel::resource::{HandleId, OpenFlags, ResourceId, SelectEvents};

    fn pipe(sched: &mut Scheduler) -> (ResourceId, HandleId, HandleId) {
        let id = sched.resources_mut().insert(Pipe::new(64));
        let rd = sched.resources_mut().open(id, OpenFlags::READ).unwrap();
        let wr = sched.resources_mut().open(id, OpenFlags::WRITE).unwrap();
        (id, rd, wr)
    }

    #[test]
    fn test_spawn_assigns_increasing_ids() {
        let mut sched = Scheduler::default();
        let a = sched.spawn("a", None);
        let b = sched.spawn("b", Some(a));
        assert!(b > a);
        assert_eq!(sched.state(a), Some(TaskState::Runnable));
        assert_eq!(sched.children(a), vec![b]);
    }

    #[test]
    fn test_block_and_wake_on_time() {
        let mut sched = Scheduler::default();
        let t = sched.spawn("sleeper", None);
        sched.block(t, Blocker::Time { wakeup: Tick(2) }).unwrap();
        assert_eq!(sched.state(t), Some(TaskState::Blocked));

        let report = sched.advance(1).unwrap();
        assert!(report.unblocked.is_empty());
        assert_eq!(sched.state(t), Some(TaskState::Blocked));

        let report = sched.advance(1).unwrap();
        assert_eq!(report.unblocked, vec![t]);
        assert_eq!(sched.state(t), Some(TaskState::Runnable));
        assert!(sched.task(t).unwrap().blocker().is_none());
        assert_eq!(sched.take_wake(t), Some(WakeOutput::Elapsed(Tick(2))));
    }

    #[test]
    fn test_advance_without_evaluation() {
        let config = SchedulerConfig {
            evaluate_on_tick: false,
            ..SchedulerConfig::default()
        };
        let mut sched = Scheduler::new(config);
        let t = sched.spawn("sleeper", None);
        sched.block(t, Blocker::Time { wakeup: Tick(1) }).unwrap();

        assert!(sched.advance(5).is_none());
        assert_eq!(sched.state(t), Some(TaskState::Blocked));
        assert_eq!(sched.evaluate_pass().unblocked, vec![t]);
    }

    #[test]
    #[should_panic(expected = "cannot block")]
    fn test_double_block_panics() {
        let mut sched = Scheduler::default();
        let t = sched.spawn("t", None);
        sched.block(t, Blocker::Time { wakeup: Tick(9) }).unwrap();
        let _ = sched.block(t, Blocker::Time { wakeup: Tick(9) });
    }

    #[test]
    fn test_block_unknown_task() {
        let mut sched = Scheduler::default();
        assert_eq!(
            sched.block(TaskId(42), Blocker::Time { wakeup: Tick(1) }),
            Err(SchedError::NoSuchTask(TaskId(42)))
        );
    }

    #[test]
    fn test_wait_validation() {
        let mut sched = Scheduler::default();
        let t = sched.spawn("t", None);
        assert_eq!(
            sched.block(t, Blocker::Wait { task: t }),
            Err(SchedError::SelfWait(t))
        );
        assert_eq!(
            sched.block(t, Blocker::Wait { task: TaskId(77) }),
            Err(SchedError::NoSuchTask(TaskId(77)))
        );
        assert_eq!(sched.state(t), Some(TaskState::Runnable));
    }

    #[test]
    fn test_contested_read_task_id_order() {
        let mut sched = Scheduler::default();
        let (id, rd, wr) = pipe(&mut sched);
        let first = sched.spawn("first", None);
        let second = sched.spawn("second", None);

        // Second blocks first, but task-id order visits `first` first
        sched.block(second, Blocker::Read { handle: rd }).unwrap();
        sched.block(first, Blocker::Read { handle: rd }).unwrap();
        sched.resources_mut().write(wr, b"data").unwrap();

        let report = sched.evaluate_pass();
        assert_eq!(report.unblocked, vec![first]);
        assert_eq!(sched.resources().lock_holder(id), Some(first));
        assert_eq!(sched.state(second), Some(TaskState::Blocked));
    }

    #[test]
    fn test_contested_read_block_order() {
        let config = SchedulerConfig {
            pass_order: PassOrder::BlockOrder,
            ..SchedulerConfig::default()
        };
        let mut sched = Scheduler::new(config);
        let (id, rd, wr) = pipe(&mut sched);
        let first = sched.spawn("first", None);
        let second = sched.spawn("second", None);

        sched.block(second, Blocker::Read { handle: rd }).unwrap();
        sched.block(first, Blocker::Read { handle: rd }).unwrap();
        assert_eq!(sched.pass_order(), vec![second, first]);
        sched.resources_mut().write(wr, b"data").unwrap();

        assert_eq!(sched.evaluate_pass().unblocked, vec![second]);
        assert_eq!(sched.resources().lock_holder(id), Some(second));
    }

    #[test]
    fn test_loser_wakes_after_release() {
        let mut sched = Scheduler::default();
        let (id, rd, wr) = pipe(&mut sched);
        let a = sched.spawn("a", None);
        let b = sched.spawn("b", None);
        sched.block(a, Blocker::Read { handle: rd }).unwrap();
        sched.block(b, Blocker::Read { handle: rd }).unwrap();
        sched.resources_mut().write(wr, b"xy").unwrap();
        sched.evaluate_pass();

        // `a` completes its read and releases
        let mut buf = [0u8; 1];
        sched.resources_mut().read(rd, &mut buf).unwrap();
        sched.resources_mut().unlock(id, a).unwrap();

        assert_eq!(sched.evaluate_pass().unblocked, vec![b]);
        assert_eq!(sched.resources().lock_holder(id), Some(b));
    }

    #[test]
    fn test_cancel_blocked_task() {
        let mut sched = Scheduler::default();
        let (id, rd, wr) = pipe(&mut sched);
        let t = sched.spawn("victim", None);
        sched.block(t, Blocker::Read { handle: rd }).unwrap();

        sched.cancel(t, 9).unwrap();
        assert_eq!(sched.state(t), Some(TaskState::Canceled));
        assert!(sched.task(t).unwrap().blocker().is_none());
        assert!(sched.blocked_tasks().is_empty());

        // Dropped blocker never runs its unblock action
        sched.resources_mut().write(wr, b"late").unwrap();
        sched.evaluate_pass();
        assert!(!sched.resources().is_locked(id));
        assert_eq!(
            sched.task(t).unwrap().exit_status(),
            Some(ExitStatus::Canceled(9))
        );
    }

    #[test]
    fn test_cancel_releases_locks() {
        let mut sched = Scheduler::default();
        let (id, rd, wr) = pipe(&mut sched);
        let t = sched.spawn("holder", None);
        sched.block(t, Blocker::Read { handle: rd }).unwrap();
        sched.resources_mut().write(wr, b"x").unwrap();
        sched.evaluate_pass();
        assert_eq!(sched.resources().lock_holder(id), Some(t));

        sched.cancel(t, 1).unwrap();
        assert!(!sched.resources().is_locked(id));
    }

    #[test]
    fn test_cancel_twice_keeps_first_status() {
        let mut sched = Scheduler::default();
        let t = sched.spawn("t", None);
        sched.cancel(t, 1).unwrap();
        sched.cancel(t, 2).unwrap();
        assert_eq!(
            sched.task(t).unwrap().exit_status(),
            Some(ExitStatus::Canceled(1))
        );
        assert_eq!(sched.stats().cancels, 1);
    }

    #[test]
    fn test_wait_sees_cancel_on_next_pass() {
        let mut sched = Scheduler::default();
        let parent = sched.spawn("parent", None);
        let child = sched.spawn("child", Some(parent));
        sched.block(parent, Blocker::Wait { task: child }).unwrap();

        assert!(sched.evaluate_pass().unblocked.is_empty());
        sched.cancel(child, 42).unwrap();
        assert_eq!(sched.evaluate_pass().unblocked, vec![parent]);
        assert_eq!(
            sched.take_wake(parent),
            Some(WakeOutput::Exited {
                task: child,
                status: ExitStatus::Canceled(42)
            })
        );
    }

    #[test]
    fn test_wait_sees_exit() {
        let mut sched = Scheduler::default();
        let parent = sched.spawn("parent", None);
        let child = sched.spawn("child", Some(parent));
        sched.block(parent, Blocker::Wait { task: child }).unwrap();
        sched.exit(child, 0).unwrap();

        sched.evaluate_pass();
        assert_eq!(
            sched.take_wake(parent),
            Some(WakeOutput::Exited {
                task: child,
                status: ExitStatus::Exited(0)
            })
        );
    }

    #[test]
    #[should_panic(expected = "cannot exit while blocked")]
    fn test_exit_while_blocked_panics() {
        let mut sched = Scheduler::default();
        let t = sched.spawn("t", None);
        sched.block(t, Blocker::Time { wakeup: Tick(5) }).unwrap();
        let _ = sched.exit(t, 0);
    }

    #[test]
    fn test_reap() {
        let mut sched = Scheduler::default();
        let t = sched.spawn("t", None);
        assert_eq!(sched.reap(t).unwrap_err(), SchedError::NotFinished(t));

        sched.exit(t, 3).unwrap();
        let reaped = sched.reap(t).unwrap();
        assert_eq!(reaped.state(), TaskState::Terminated);
        assert_eq!(reaped.exit_status(), Some(ExitStatus::Exited(3)));
        assert_eq!(sched.state(t), None);
        assert_eq!(sched.reap(t).unwrap_err(), SchedError::NoSuchTask(t));
    }

    #[test]
    fn test_reap_refused_while_awaited() {
        let mut sched = Scheduler::default();
        let parent = sched.spawn("parent", None);
        let child = sched.spawn("child", Some(parent));
        sched.block(parent, Blocker::Wait { task: child }).unwrap();
        sched.cancel(child, 5).unwrap();

        assert_eq!(sched.reap(child).unwrap_err(), SchedError::StillAwaited(child));
        sched.evaluate_pass();
        assert!(sched.reap(child).is_ok());
    }

    #[test]
    fn test_poll_now() {
        let mut sched = Scheduler::default();
        let (id, rd, wr) = pipe(&mut sched);
        let t = sched.spawn("reader", None);

        let blocker = sched.poll_now(t, Blocker::Read { handle: rd }).unwrap_err();
        assert_eq!(blocker, Blocker::Read { handle: rd });
        assert_eq!(sched.state(t), Some(TaskState::Runnable));

        sched.resources_mut().write(wr, b"now").unwrap();
        assert_eq!(sched.poll_now(t, blocker), Ok(WakeOutput::Acquired(id)));
        assert_eq!(sched.resources().lock_holder(id), Some(t));
        assert_eq!(sched.stats().passes, 0);
    }

    #[test]
    fn test_poll_now_leaves_lock_to_blocked_reader() {
        let mut sched = Scheduler::default();
        let (id, rd, wr) = pipe(&mut sched);
        let waiting = sched.spawn("waiting", None);
        let late = sched.spawn("late", None);
        sched.block(waiting, Blocker::Read { handle: rd }).unwrap();

        sched.resources_mut().write(wr, b"1").unwrap();
        let blocker = sched.poll_now(late, Blocker::Read { handle: rd }).unwrap_err();
        assert!(!sched.resources().is_locked(id));

        sched.block(late, blocker).unwrap();
        assert_eq!(sched.evaluate_pass().unblocked, vec![waiting]);
        assert_eq!(sched.resources().lock_holder(id), Some(waiting));
    }

    #[test]
    fn test_poll_now_ignores_unready_waiters() {
        let mut sched = Scheduler::default();
        let (id, rd, wr) = pipe(&mut sched);
        let reader = sched.spawn("reader", None);
        let writer = sched.spawn("writer", None);
        // The blocked reader cannot proceed until data arrives
        sched.block(reader, Blocker::Read { handle: rd }).unwrap();

        assert_eq!(
            sched.poll_now(writer, Blocker::Write { handle: wr }),
            Ok(WakeOutput::Acquired(id))
        );
    }

    #[test]
    fn test_select_through_scheduler() {
        let mut sched = Scheduler::default();
        let (_a, a_rd, _a_wr) = pipe(&mut sched);
        let (_b, b_rd, b_wr) = pipe(&mut sched);
        let t = sched.spawn("selector", None);
        sched
            .block(
                t,
                Blocker::select([(a_rd, SelectEvents::READ), (b_rd, SelectEvents::READ)]),
            )
            .unwrap();

        sched.resources_mut().write(b_wr, b"!").unwrap();
        sched.evaluate_pass();
        assert_eq!(
            sched.take_wake(t),
            Some(WakeOutput::Selected {
                handle: b_rd,
                events: SelectEvents::READ
            })
        );
    }

    #[test]
    fn test_pass_report_and_stats() {
        let mut sched = Scheduler::default();
        let a = sched.spawn("a", None);
        let b = sched.spawn("b", None);
        sched.block(a, Blocker::Time { wakeup: Tick(1) }).unwrap();
        sched.block(b, Blocker::Time { wakeup: Tick(3) }).unwrap();

        let report = sched.advance(1).unwrap();
        assert_eq!(report.pass, 1);
        assert_eq!(report.evaluated, 2);
        assert_eq!(report.unblocked, vec![a]);

        let report = sched.evaluate_pass();
        assert_eq!(report.pass, 2);
        assert_eq!(report.evaluated, 1);

        let stats = sched.stats();
        assert_eq!(stats.passes, 2);
        assert_eq!(stats.blocks, 2);
        assert_eq!(stats.unblocks, 1);
        assert_eq!(stats.peak_blocked, 2);
    }

    #[test]
    fn test_trace_records_lifecycle() {
        let mut sched = Scheduler::default();
        let t = sched.spawn("t", None);
        sched.block(t, Blocker::Time { wakeup: Tick(1) }).unwrap();
        sched.advance(1);
        sched.exit(t, 0).unwrap();
        sched.reap(t).unwrap();

        let kinds: Vec<_> = sched.tracer().events_for(t).iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SchedEventKind::Spawn,
                SchedEventKind::Block(crate::kernel::blocker::BlockerKind::Time),
                SchedEventKind::Unblock(crate::kernel::blocker::BlockerKind::Time),
                SchedEventKind::Exit,
                SchedEventKind::Reap,
            ]
        );
    }
}
