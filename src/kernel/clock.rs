//! Scheduler clock
//!
//! Timed suspension is measured in ticks of a counter that only moves
//! forward. Wall-clock time never enters the scheduler, so adjusting it
//! cannot wake a sleeper early.

use serde::{Deserialize, Serialize};

/// A point on the scheduler's monotonic timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Tick(pub u64);

impl Tick {
    pub const ZERO: Tick = Tick(0);

    /// The tick `ticks` after this one, saturating at the end of time
    pub fn after(self, ticks: u64) -> Tick {
        Tick(self.0.saturating_add(ticks))
    }
}

impl std::fmt::Display for Tick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tick:{}", self.0)
    }
}

/// Monotonic tick counter
#[derive(Debug, Default)]
pub struct Clock {
    now: Tick,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Tick {
        self.now
    }

    /// Move the clock forward and return the new time
    pub fn advance(&mut self, ticks: u64) -> Tick {
        self.now = self.now.after(ticks);
        self.now
    }
}
