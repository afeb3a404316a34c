//! Blockers - what a suspended task is waiting for
//!
//! A [`Blocker`] is a predicate over current system state plus a one-shot
//! action that runs when the predicate first holds. The scheduler is the
//! only caller: [`Blocker::can_unblock`] on every pass, then
//! [`Blocker::on_unblock`] once, consuming the blocker, before the owning
//! task becomes runnable again.
//!
//! The predicate borrows everything immutably through [`Readiness`], so
//! re-evaluating it any number of times changes nothing.

use super::clock::Tick;
use super::resource::{HandleId, ResourceId, ResourceTable, SelectEvents};
use super::task::{ExitStatus, TaskId, TaskTable};
use serde::Serialize;

/// One handle a select waits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectEntry {
    pub handle: HandleId,
    pub interest: SelectEvents,
}

/// A suspension condition, one variant per blocking operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Blocker {
    /// Incoming connection on a listener
    Accept { listener: HandleId },
    /// The peer accepts our connection
    Connect { connection: ResourceId },
    Read { handle: HandleId },
    Write { handle: HandleId },
    /// First ready handle, in registration order
    Select { entries: Vec<SelectEntry> },
    /// Clock reaches `wakeup`
    Time { wakeup: Tick },
    /// Another task finishes
    Wait { task: TaskId },
}

/// Blocker variant tag, for tracing and stats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BlockerKind {
    Accept,
    Connect,
    Read,
    Write,
    Select,
    Time,
    Wait,
}

impl std::fmt::Display for BlockerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BlockerKind::Accept => "accept",
            BlockerKind::Connect => "connect",
            BlockerKind::Read => "read",
            BlockerKind::Write => "write",
            BlockerKind::Select => "select",
            BlockerKind::Time => "time",
            BlockerKind::Wait => "wait",
        };
        write!(f, "{}", name)
    }
}

/// What the unblock action left for the resumed task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeOutput {
    /// The task now holds the resource's lock
    Acquired(ResourceId),
    /// The connection left the pending state
    Connected(ResourceId),
    /// First ready handle of a select and its ready events
    Selected {
        handle: HandleId,
        events: SelectEvents,
    },
    /// Clock at the moment the sleeper woke
    Elapsed(Tick),
    /// Exit status copied from the awaited task
    Exited { task: TaskId, status: ExitStatus },
    /// The handle or task waited on no longer exists
    Closed,
}

/// Read-only view of system state for predicates
#[derive(Clone, Copy)]
pub struct Readiness<'a> {
    pub now: Tick,
    pub resources: &'a ResourceTable,
    pub tasks: &'a TaskTable,
}

/// What an unblock action may touch
pub struct UnblockContext<'a> {
    pub now: Tick,
    pub resources: &'a mut ResourceTable,
    pub tasks: &'a TaskTable,
}

impl Blocker {
    /// Build a select blocker; order of `entries` is the tie-break order
    pub fn select(entries: impl IntoIterator<Item = (HandleId, SelectEvents)>) -> Self {
        Blocker::Select {
            entries: entries
                .into_iter()
                .map(|(handle, interest)| SelectEntry { handle, interest })
                .collect(),
        }
    }

    pub fn kind(&self) -> BlockerKind {
        match self {
            Blocker::Accept { .. } => BlockerKind::Accept,
            Blocker::Connect { .. } => BlockerKind::Connect,
            Blocker::Read { .. } => BlockerKind::Read,
            Blocker::Write { .. } => BlockerKind::Write,
            Blocker::Select { .. } => BlockerKind::Select,
            Blocker::Time { .. } => BlockerKind::Time,
            Blocker::Wait { .. } => BlockerKind::Wait,
        }
    }

    /// The resource whose lock this blocker claims on unblock
    pub fn lock_target(&self, resources: &ResourceTable) -> Option<ResourceId> {
        match self {
            Blocker::Accept { listener: handle }
            | Blocker::Read { handle }
            | Blocker::Write { handle } => resources.handle(*handle).map(|h| h.resource),
            _ => None,
        }
    }

    /// Whether the owning task may resume
    pub fn can_unblock(&self, ctx: &Readiness<'_>) -> bool {
        let resources = ctx.resources;
        match self {
            Blocker::Accept { listener } => match resources.resolve(*listener) {
                Some((h, r)) => !resources.is_locked(h.resource) && r.can_accept(),
                None => true,
            },
            Blocker::Connect { connection } => {
                resources.get(*connection).is_none_or(|r| r.is_accepted())
            }
            Blocker::Read { handle } => match resources.resolve(*handle) {
                Some((h, r)) => !resources.is_locked(h.resource) && r.can_read(h),
                None => true,
            },
            Blocker::Write { handle } => match resources.resolve(*handle) {
                Some((h, r)) => !resources.is_locked(h.resource) && r.can_write(h),
                None => true,
            },
            Blocker::Select { entries } => first_ready(entries, resources).is_some(),
            Blocker::Time { wakeup } => ctx.now >= *wakeup,
            Blocker::Wait { task } => ctx.tasks.state(*task).is_none_or(|s| s.is_finished()),
        }
    }

    /// Run the one-time unblock action. Only call right after
    /// `can_unblock` returned true, with no state change in between.
    pub fn on_unblock(self, owner: TaskId, ctx: UnblockContext<'_>) -> WakeOutput {
        match self {
            Blocker::Connect { connection } => WakeOutput::Connected(connection),
            Blocker::Accept { listener: handle }
            | Blocker::Read { handle }
            | Blocker::Write { handle } => {
                match ctx.resources.handle(handle).map(|h| h.resource) {
                    Some(resource) => {
                        ctx.resources.lock(resource, owner);
                        WakeOutput::Acquired(resource)
                    }
                    None => WakeOutput::Closed,
                }
            }
            Blocker::Select { entries } => match first_ready(&entries, ctx.resources) {
                Some((handle, events)) => WakeOutput::Selected { handle, events },
                None => unreachable!("{} unblocked on a select with nothing ready", owner),
            },
            Blocker::Time { .. } => WakeOutput::Elapsed(ctx.now),
            Blocker::Wait { task } => match ctx.tasks.get(task).and_then(|t| t.exit_status()) {
                Some(status) => WakeOutput::Exited { task, status },
                None => WakeOutput::Closed,
            },
        }
    }
}

/// Scan in registration order; stop at the first handle with events
fn first_ready(entries: &[SelectEntry], resources: &ResourceTable) -> Option<(HandleId, SelectEvents)> {
    entries.iter().find_map(|entry| {
        let events = match resources.resolve(entry.handle) {
            Some((h, r)) => r.ready_events(h, entry.interest) & entry.interest,
            None => SelectEvents::CLOSED,
        };
        (!events.is_empty()).then_some((entry.handle, events))
    })
}
