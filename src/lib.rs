//! blockwake - the blocking and wakeup core of a small kernel
//!
//! Design principles:
//! - One way to wait: every blocking operation is a [`kernel::Blocker`]
//! - Polled readiness: passes re-check conditions, nothing pushes wakeups
//! - Exclusive hand-off: a wakeup that grants access takes the resource
//!   lock before the task runs, so one event never wakes two consumers
//! - Deterministic: pass order is configured, time is a tick counter
//!
//! The crate is hosted: it runs on `std` and models devices behind traits,
//! which keeps the whole scheduler testable with plain `cargo test`.
//! Logging goes through the `log` facade; the embedder installs a logger.

pub mod devices;
pub mod kernel;
