//! Defines the resumable units of work run by the scheduler.
//!
//! A task body is an explicit continuation: the scheduler calls
//! `Process::resume` with the `Wake` that fired, and the body runs until it
//! returns the next `Step`. Multi-step scripts are written as a `Sequence`,
//! an ordered list of step closures with a repetition policy.

use crate::context::Context;
use crate::trigger::{Trigger, Wake};
use anyhow::bail;
use std::fmt;

/// What a task body asks for when it yields control.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Suspend until `Trigger` fires.
    Wait(Trigger),
    /// The body has nothing left to do.
    Done,
}

/// A resumable task body.
pub trait Process: Send {
    /// Runs the body from its current continuation point until it suspends
    /// or finishes. `wake` is `Wake::Start` on the first call.
    fn resume(&mut self, cx: &mut Context<'_>, wake: Wake) -> anyhow::Result<Step>;
}

impl Process for Box<dyn Process> {
    fn resume(&mut self, cx: &mut Context<'_>, wake: Wake) -> anyhow::Result<Step> {
        (**self).resume(cx, wake)
    }
}

/// A `Process` backed by a closure. Built with `from_fn`.
pub struct FromFn<F>(F);

/// Wraps a closure as a task body.
///
/// ```rust,ignore
/// let watcher = from_fn(move |cx, wake| {
///     if let Wake::Edge { value, .. } = wake {
///         cx.observe(format!("clk -> {}", value), &[]);
///     }
///     Ok(Step::Wait(rising_edge(clk)))
/// });
/// ```
pub fn from_fn<F>(f: F) -> FromFn<F>
where
    F: FnMut(&mut Context<'_>, Wake) -> anyhow::Result<Step> + Send,
{
    FromFn(f)
}

impl<F> Process for FromFn<F>
where
    F: FnMut(&mut Context<'_>, Wake) -> anyhow::Result<Step> + Send,
{
    fn resume(&mut self, cx: &mut Context<'_>, wake: Wake) -> anyhow::Result<Step> {
        (self.0)(cx, wake)
    }
}

/// A function closure that represents one step of a `Sequence`.
pub type SequenceStep = Box<dyn FnMut(&mut Context<'_>, &Wake) -> anyhow::Result<Step> + Send>;

/// Defines the repetition behavior of a `Sequence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepetitionPolicy {
    /// The sequence runs through its steps once and then completes.
    RunOnce,
    /// The sequence runs through its steps N times and then completes.
    RunNTimes(u32),
    /// The sequence repeats indefinitely.
    Repeat,
}

/// A task body made of ordered steps.
///
/// Each resumption runs the current step. A step that returns
/// `Step::Wait` suspends the task, and the next resumption runs the
/// following step. A step that returns `Step::Done` falls through to the
/// following step within the same resumption.
pub struct Sequence {
    steps: Vec<SequenceStep>,
    current_step: usize,
    repetition_policy: RepetitionPolicy,
    current_run_count: u32,
}

impl Sequence {
    /// Creates an empty `Sequence`.
    pub fn new(repetition_policy: RepetitionPolicy) -> Self {
        Self {
            steps: Vec::new(),
            current_step: 0,
            repetition_policy,
            current_run_count: 0,
        }
    }

    /// Appends a step.
    pub fn step<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut Context<'_>, &Wake) -> anyhow::Result<Step> + Send + 'static,
    {
        self.steps.push(Box::new(f));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Index of the step the next resumption will run.
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// Number of complete passes through the steps.
    pub fn run_count(&self) -> u32 {
        self.current_run_count
    }

    /// Handles the end of a pass. Returns `true` when the sequence is
    /// finished.
    fn finish_pass(&mut self) -> bool {
        self.current_run_count += 1;
        self.current_step = 0;
        match self.repetition_policy {
            RepetitionPolicy::RunOnce => true,
            RepetitionPolicy::RunNTimes(n) => self.current_run_count >= n,
            RepetitionPolicy::Repeat => false,
        }
    }
}

impl Process for Sequence {
    fn resume(&mut self, cx: &mut Context<'_>, wake: Wake) -> anyhow::Result<Step> {
        // A pass only stops midway at a suspension.
        let mut suspended_this_pass = self.current_step > 0;
        loop {
            if self.current_step >= self.steps.len() {
                if self.finish_pass() || self.steps.is_empty() {
                    return Ok(Step::Done);
                }
                // A bounded repetition always terminates.
                if !suspended_this_pass && matches!(self.repetition_policy, RepetitionPolicy::Repeat) {
                    bail!("sequence repeated a full pass without suspending");
                }
                suspended_this_pass = false;
            }
            let step = self.current_step;
            self.current_step += 1;
            if let Step::Wait(trigger) = (self.steps[step])(cx, &wake)? {
                return Ok(Step::Wait(trigger));
            }
        }
    }
}

/// The lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Created,
    Running,
    Suspended,
    Completed,
    Cancelled,
    Failed,
}

impl TaskState {
    /// Whether the task will never run again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Cancelled | TaskState::Failed)
    }

    pub fn label(self) -> &'static str {
        match self {
            TaskState::Created => "created",
            TaskState::Running => "running",
            TaskState::Suspended => "suspended",
            TaskState::Completed => "completed",
            TaskState::Cancelled => "cancelled",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How a finished task ended, as reported to tasks joining it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Cancelled,
    Failed { message: String },
}

impl TaskOutcome {
    pub fn state(&self) -> TaskState {
        match self {
            TaskOutcome::Completed => TaskState::Completed,
            TaskOutcome::Cancelled => TaskState::Cancelled,
            TaskOutcome::Failed { .. } => TaskState::Failed,
        }
    }
}
