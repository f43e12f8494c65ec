//! Triggers a task can suspend on, and the wake values it is resumed with.
//!
//! A task suspends by returning `Step::Wait(trigger)`. The scheduler turns
//! the trigger into queue events, edge registrations or phase waiters, and
//! resumes the task with a `Wake` describing what fired.

use crate::common::{Phase, SignalId, TaskId};
use crate::components::task::TaskOutcome;
use crate::value::{Edge, Value};
use std::fmt;

/// A condition a task suspends on.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Fires at the Normal phase once `ticks` have elapsed. A zero delay
    /// fires in the next delta iteration of the current tick.
    Delay(u64),
    /// Fires at the Normal phase of an absolute tick.
    At(u64),
    /// Fires in the delta iteration after a matching commit of `signal`.
    Edge { signal: SignalId, edge: Edge },
    /// Fires at the named phase marker.
    Phase(Phase),
    /// Fires once `task` has finished, whatever its outcome.
    Join(TaskId),
    /// Fires with the first alternative that fires; the rest are dropped.
    First(Vec<Trigger>),
}

/// Fires once `ticks` have elapsed.
pub fn after(ticks: u64) -> Trigger {
    Trigger::Delay(ticks)
}

/// Fires at the absolute `tick`.
pub fn at(tick: u64) -> Trigger {
    Trigger::At(tick)
}

pub fn on_edge(signal: SignalId, edge: Edge) -> Trigger {
    Trigger::Edge { signal, edge }
}

pub fn rising_edge(signal: SignalId) -> Trigger {
    on_edge(signal, Edge::Rising)
}

pub fn falling_edge(signal: SignalId) -> Trigger {
    on_edge(signal, Edge::Falling)
}

pub fn value_change(signal: SignalId) -> Trigger {
    on_edge(signal, Edge::Any)
}

/// Resumes once every write of the current instant has committed.
pub fn read_only() -> Trigger {
    Trigger::Phase(Phase::ReadOnly)
}

/// Resumes after the Normal phase of the current instant is exhausted.
pub fn read_write() -> Trigger {
    Trigger::Phase(Phase::ReadWrite)
}

/// Resumes at the start of the next instant, before its first Normal pass.
pub fn next_delta() -> Trigger {
    Trigger::Phase(Phase::NextDelta)
}

pub fn join(task: TaskId) -> Trigger {
    Trigger::Join(task)
}

/// Races `triggers`; a timeout is `first([edge, after(n)])`.
pub fn first(triggers: impl IntoIterator<Item = Trigger>) -> Trigger {
    Trigger::First(triggers.into_iter().collect())
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Delay(ticks) => write!(f, "delay({})", ticks),
            Trigger::At(tick) => write!(f, "at({})", tick),
            Trigger::Edge { signal, edge } => write!(f, "{} edge of {:?}", edge, signal),
            Trigger::Phase(phase) => write!(f, "{}", phase),
            Trigger::Join(task) => write!(f, "join({:?})", task),
            Trigger::First(list) => {
                f.write_str("first(")?;
                for (i, t) in list.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", t)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// What a task is resumed with.
#[derive(Debug, Clone, PartialEq)]
pub enum Wake {
    /// The first resumption, right after spawn.
    Start,
    /// A `Delay` or `At` elapsed.
    Timer,
    /// A matching commit; `value` is the newly committed value.
    Edge { signal: SignalId, value: Value },
    /// The phase marker was reached.
    Phase(Phase),
    /// A joined task finished.
    Joined { task: TaskId, outcome: TaskOutcome },
    /// Alternative `index` of a `First` race fired.
    Race { index: usize, wake: Box<Wake> },
}

impl Wake {
    /// Index of the winning alternative when resumed from a race.
    pub fn race_index(&self) -> Option<usize> {
        match self {
            Wake::Race { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// The underlying wake, looking through a race wrapper.
    pub fn inner(&self) -> &Wake {
        match self {
            Wake::Race { wake, .. } => wake.inner(),
            other => other,
        }
    }
}
