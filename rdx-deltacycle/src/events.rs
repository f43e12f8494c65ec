//! Defines all public event types broadcast by the deltacycle engine.
//!
//! Listeners subscribe with `Simulator::subscribe_events` and receive a
//! `SimEvent` for every time advance, phase batch, commit and task
//! transition. Sending never blocks the engine; a listener that falls behind
//! sees `RecvError::Lagged` rather than slowing the simulation down.

use crate::common::{Phase, SignalId, SimTime, TaskId};
use crate::value::Value;
use serde::Serialize;
use std::fmt;

/// Everything the engine reports about a run.
#[derive(Debug, Clone)]
pub enum SimEvent {
    /// Simulated time moved to a new tick.
    TimeAdvanced { time: SimTime },
    /// A batch of resumptions is about to run.
    PhaseEntered { time: SimTime, phase: Phase },
    /// A pending write changed a signal's committed value.
    SignalCommitted {
        time: SimTime,
        signal: SignalId,
        name: String,
        value: Value,
    },
    TaskSpawned { id: TaskId, name: String },
    TaskResumed { id: TaskId, time: SimTime, phase: Phase },
    TaskSuspended { id: TaskId, trigger: String },
    TaskCompleted { id: TaskId },
    TaskCancelled { id: TaskId },
    TaskFailed { id: TaskId, message: String },
    /// A task recorded an observation.
    Observed(Observation),
    /// Fired once when the simulator is torn down.
    EngineShutdown,
}

/// A timestamped record of signal values, made by a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub time: SimTime,
    pub phase: Phase,
    pub task: String,
    pub message: String,
    /// `(signal name, committed value)` pairs, in the order requested.
    pub values: Vec<(String, Value)>,
}

impl Observation {
    /// The recorded value of the named signal.
    pub fn value(&self, name: &str) -> Option<Value> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}] {}: {}", self.time, self.phase, self.task, self.message)?;
        if !self.values.is_empty() {
            f.write_str(" (")?;
            for (i, (name, value)) in self.values.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}={}", name, value)?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}
