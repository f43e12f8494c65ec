//! Contains common, primitive types shared by every part of the engine.
//!
//! This module defines the key types used to identify signals and tasks,
//! the fixed phase sequence of a simulated instant, and `SimTime`, the
//! `(tick, delta)` pair that totally orders everything the engine does.

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Uniquely and safely identifies a signal registered with the simulator.
    ///
    /// Keys are never reused, so a stale id held by a torn-down bench can not
    /// alias a newer signal.
    pub struct SignalId;

    /// Uniquely identifies a task (a suspended unit of work) owned by the scheduler.
    pub struct TaskId;
}

/// One of the fixed sub-steps of a simulated instant.
///
/// The derived ordering is the rank used by the event queue: all `Normal`
/// work of an instant sorts before its `ReadWrite` work, which sorts before
/// its `ReadOnly` work. `NextDelta` waiters are not queued by rank; they are
/// held aside and resumed when the next instant is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Delay expirations and edge wake-ups; repeated once per delta iteration.
    Normal,
    /// Runs once Normal is exhausted. Writes are still legal.
    ReadWrite,
    /// Silent observation of the settled instant. Writes are illegal.
    ReadOnly,
    /// Start of the following instant, before its first Normal pass.
    NextDelta,
}

impl Phase {
    /// Whether signal writes may be staged while this phase runs.
    #[inline]
    pub fn allows_writes(self) -> bool {
        !matches!(self, Phase::ReadOnly)
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Normal => "normal",
            Phase::ReadWrite => "read_write",
            Phase::ReadOnly => "read_only",
            Phase::NextDelta => "next_delta",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A point in simulated time: an integer tick plus the delta iteration
/// within that tick.
///
/// Ordering is lexicographic on `(tick, delta)`. Time only moves forward,
/// and `delta` resets to zero whenever `tick` advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SimTime {
    pub tick: u64,
    pub delta: u32,
}

impl SimTime {
    /// The start of every simulation.
    pub const ZERO: SimTime = SimTime { tick: 0, delta: 0 };

    #[inline]
    pub fn new(tick: u64, delta: u32) -> Self {
        SimTime { tick, delta }
    }

    /// The first delta iteration of `tick`.
    #[inline]
    pub fn at_tick(tick: u64) -> Self {
        SimTime { tick, delta: 0 }
    }

    /// The following delta iteration of the same tick.
    #[inline]
    pub fn next_delta(self) -> Self {
        SimTime {
            tick: self.tick,
            delta: self.delta + 1,
        }
    }

    /// The first delta of the tick `ticks` after this one.
    /// Returns `None` on overflow.
    #[inline]
    pub fn after(self, ticks: u64) -> Option<Self> {
        self.tick.checked_add(ticks).map(SimTime::at_tick)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T={}:{}", self.tick, self.delta)
    }
}
