//! Scheduler tracing and statistics
//!
//! Design:
//! - Lightweight event records stamped with tick and pass number
//! - Ring buffer for recent events (bounded memory)
//! - Counters that are always on, independent of the event buffer
//! - JSON export for offline inspection

use super::blocker::BlockerKind;
use super::clock::Tick;
use super::task::TaskId;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// What happened to a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedEventKind {
    Spawn,
    Block(BlockerKind),
    Unblock(BlockerKind),
    Cancel,
    Exit,
    Reap,
}

impl std::fmt::Display for SchedEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedEventKind::Spawn => write!(f, "SPAWN"),
            SchedEventKind::Block(kind) => write!(f, "BLOCK({})", kind),
            SchedEventKind::Unblock(kind) => write!(f, "UNBLOCK({})", kind),
            SchedEventKind::Cancel => write!(f, "CANCEL"),
            SchedEventKind::Exit => write!(f, "EXIT"),
            SchedEventKind::Reap => write!(f, "REAP"),
        }
    }
}

/// A single trace event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedEvent {
    pub tick: Tick,
    /// Evaluation passes completed when the event was recorded
    pub pass: u64,
    pub task: TaskId,
    pub kind: SchedEventKind,
}

/// Scheduler statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub passes: u64,
    /// Blocker predicates evaluated (cumulative)
    pub evaluated: u64,
    pub spawned: u64,
    pub blocks: u64,
    pub unblocks: u64,
    pub cancels: u64,
    pub exits: u64,
    pub reaps: u64,
    /// Most tasks blocked at once
    pub peak_blocked: usize,
    /// Unblocks per blocker kind
    pub unblocks_by_kind: HashMap<BlockerKind, u64>,
}

impl SchedulerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished pass
    pub fn record_pass(&mut self, evaluated: usize) {
        self.passes += 1;
        self.evaluated += evaluated as u64;
    }

    pub fn record_block(&mut self, blocked_now: usize) {
        self.blocks += 1;
        if blocked_now > self.peak_blocked {
            self.peak_blocked = blocked_now;
        }
    }

    pub fn record_unblock(&mut self, kind: BlockerKind) {
        self.unblocks += 1;
        *self.unblocks_by_kind.entry(kind).or_insert(0) += 1;
    }

    /// Average predicates evaluated per pass
    pub fn avg_evaluated_per_pass(&self) -> f64 {
        if self.passes == 0 {
            0.0
        } else {
            self.evaluated as f64 / self.passes as f64
        }
    }
}

/// Event recorder
#[derive(Debug)]
pub struct Tracer {
    enabled: bool,
    capacity: usize,
    /// Ring buffer of recent events
    events: VecDeque<SchedEvent>,
    /// Events pushed out of the ring
    dropped: u64,
}

impl Tracer {
    pub fn new(capacity: usize, enabled: bool) -> Self {
        Self {
            enabled,
            capacity,
            events: VecDeque::with_capacity(capacity.min(1024)),
            dropped: 0,
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(&mut self, event: SchedEvent) {
        if !self.enabled || self.capacity == 0 {
            return;
        }
        if self.events.len() >= self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    pub fn events(&self) -> &VecDeque<SchedEvent> {
        &self.events
    }

    pub fn events_for(&self, task: TaskId) -> Vec<&SchedEvent> {
        self.events.iter().filter(|e| e.task == task).collect()
    }

    /// The last `n` events, oldest first
    pub fn recent(&self, n: usize) -> Vec<&SchedEvent> {
        let skip = self.events.len().saturating_sub(n);
        self.events.iter().skip(skip).collect()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.dropped = 0;
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.events)
    }

    /// One line per event, for dumping to a console
    pub fn format(&self) -> String {
        let mut out = String::new();
        for e in &self.events {
            out.push_str(&format!("[{} #{}] {} {}\n", e.tick, e.pass, e.task, e.kind));
        }
        out
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new(1000, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(task: u64, kind: SchedEventKind) -> SchedEvent {
        SchedEvent {
            tick: Tick(0),
            pass: 0,
            task: TaskId(task),
            kind,
        }
    }

    #[test]
    fn test_tracer_disabled_records_nothing() {
        let mut tracer = Tracer::new(8, false);
        tracer.record(event(1, SchedEventKind::Spawn));
        assert!(tracer.events().is_empty());

        tracer.enable();
        tracer.record(event(1, SchedEventKind::Spawn));
        assert_eq!(tracer.events().len(), 1);
    }

    #[test]
    fn test_ring_buffer_drops_oldest() {
        let mut tracer = Tracer::new(3, true);
        for task in 0..5 {
            tracer.record(event(task, SchedEventKind::Spawn));
        }
        assert_eq!(tracer.events().len(), 3);
        assert_eq!(tracer.dropped(), 2);
        assert_eq!(tracer.events()[0].task, TaskId(2));
    }

    #[test]
    fn test_filter_and_recent() {
        let mut tracer = Tracer::default();
        tracer.record(event(1, SchedEventKind::Spawn));
        tracer.record(event(2, SchedEventKind::Spawn));
        tracer.record(event(1, SchedEventKind::Block(BlockerKind::Read)));
        tracer.record(event(1, SchedEventKind::Unblock(BlockerKind::Read)));

        assert_eq!(tracer.events_for(TaskId(1)).len(), 3);
        let recent = tracer.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].kind, SchedEventKind::Unblock(BlockerKind::Read));
    }

    #[test]
    fn test_json_export() {
        let mut tracer = Tracer::default();
        tracer.record(event(3, SchedEventKind::Block(BlockerKind::Wait)));
        let json = tracer.to_json().unwrap();
        assert!(json.contains("\"Wait\""));
        assert!(json.contains("\"task\":3"));
    }

    #[test]
    fn test_format() {
        let mut tracer = Tracer::default();
        tracer.record(event(4, SchedEventKind::Cancel));
        assert_eq!(tracer.format(), "[tick:0 #0] Task(4) CANCEL\n");
    }

    #[test]
    fn test_stats() {
        let mut stats = SchedulerStats::new();
        stats.record_pass(4);
        stats.record_pass(2);
        stats.record_block(3);
        stats.record_block(1);
        stats.record_unblock(BlockerKind::Time);
        stats.record_unblock(BlockerKind::Time);

        assert_eq!(stats.avg_evaluated_per_pass(), 3.0);
        assert_eq!(stats.peak_blocked, 3);
        assert_eq!(stats.unblocks_by_kind[&BlockerKind::Time], 2);
    }
}
