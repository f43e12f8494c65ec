//! Error types for the deltacycle engine.
//!
//! All fallible public APIs return `SimResult<T>`. Errors raised inside a task
//! body travel as `anyhow::Error`; a `SimError` raised there (an illegal write,
//! say) stays downcastable so a harness can tell engine rules apart from its
//! own assertion failures.

use crate::common::{Phase, SimTime};
use thiserror::Error;

/// The top-level error type for the scheduler.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SimError {
    /// A write was attempted while the ReadOnly phase was running.
    #[error("illegal write to `{signal}` at {time}: signals are read-only during the {phase} phase")]
    IllegalWrite {
        signal: String,
        phase: Phase,
        time: SimTime,
    },

    /// Something asked for an event strictly before the current time.
    #[error("causality violation: cannot schedule at {requested} when current time is {current}")]
    CausalityViolation { requested: SimTime, current: SimTime },

    /// A task is suspended on a trigger that can no longer fire.
    #[error("task `{task}` is waiting on {trigger} but no further activity is scheduled (stalled at {time})")]
    UnresolvedTrigger {
        task: String,
        trigger: String,
        time: SimTime,
    },

    /// A task body failed; `task` names the task where the failure originated.
    #[error("task `{task}` failed at {time}: {source}")]
    TaskFailed {
        task: String,
        time: SimTime,
        #[source]
        source: anyhow::Error,
    },

    /// A trigger that may not be registered from the current phase.
    #[error("cannot wait on {trigger} during the {phase} phase")]
    IllegalTrigger { trigger: String, phase: Phase },

    /// A cancellation that would interrupt a running body.
    #[error("cannot cancel task `{task}`: {reason}")]
    IllegalCancel { task: String, reason: &'static str },

    #[error("unknown signal `{0}`")]
    UnknownSignal(String),

    #[error("unknown task")]
    UnknownTask,

    #[error("signal `{0}` is already defined")]
    DuplicateSignal(String),

    /// A value that does not fit the signal's fixed kind.
    #[error("signal `{signal}` of kind {expected} cannot hold {found}")]
    TypeMismatch {
        signal: String,
        expected: String,
        found: String,
    },

    /// An edge direction that is undefined for the signal's kind.
    #[error("edge `{edge}` is not defined for signal `{signal}`")]
    InvalidEdge { signal: String, edge: String },

    /// The delta loop of one instant did not settle.
    #[error("instant T={tick} did not settle within {limit} delta iterations")]
    DeltaOverflow { tick: u64, limit: u32 },

    #[error("simulated time overflowed u64 ticks")]
    TimeOverflow,

    #[error("clock period of {period} ticks is too short to toggle")]
    InvalidClockPeriod { period: u64 },

    /// A duration that is not a whole number of ticks.
    #[error("{amount} {unit} is not representable at {precision} precision")]
    InvalidTime {
        amount: u64,
        unit: &'static str,
        precision: &'static str,
    },

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

impl SimError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            SimError::IllegalWrite { .. } => "illegal_write",
            SimError::CausalityViolation { .. } => "causality_violation",
            SimError::UnresolvedTrigger { .. } => "unresolved_trigger",
            SimError::TaskFailed { .. } => "task_failed",
            SimError::IllegalTrigger { .. } => "illegal_trigger",
            SimError::IllegalCancel { .. } => "illegal_cancel",
            SimError::UnknownSignal(_) => "unknown_signal",
            SimError::UnknownTask => "unknown_task",
            SimError::DuplicateSignal(_) => "duplicate_signal",
            SimError::TypeMismatch { .. } => "type_mismatch",
            SimError::InvalidEdge { .. } => "invalid_edge",
            SimError::DeltaOverflow { .. } => "delta_overflow",
            SimError::TimeOverflow => "time_overflow",
            SimError::InvalidClockPeriod { .. } => "invalid_clock_period",
            SimError::InvalidTime { .. } => "invalid_time",
            SimError::Config(_) => "config",
        }
    }

    /// Whether the error aborts the whole run rather than one task.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SimError::CausalityViolation { .. }
                | SimError::DeltaOverflow { .. }
                | SimError::TimeOverflow
        )
    }
}

/// Convenience alias for `Result<T, SimError>`.
pub type SimResult<T> = Result<T, SimError>;
