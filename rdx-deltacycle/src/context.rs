//! The view a running task body has of the simulator.

use crate::common::{Phase, SignalId, SimTime, TaskId};
use crate::components::task::{Process, TaskState};
use crate::config::TimeUnit;
use crate::engine::Simulator;
use crate::error::{SimError, SimResult};
use crate::value::Value;

/// Passed to `Process::resume`. Borrows the simulator for exactly one
/// resumption of one task.
pub struct Context<'a> {
    sim: &'a mut Simulator,
    task: TaskId,
}

impl<'a> Context<'a> {
    pub(crate) fn new(sim: &'a mut Simulator, task: TaskId) -> Self {
        Self { sim, task }
    }

    /// The id of the task being resumed.
    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn now(&self) -> SimTime {
        self.sim.now()
    }

    /// The phase whose batch is running.
    pub fn phase(&self) -> Phase {
        self.sim.phase()
    }

    /// Current simulated time expressed in `unit`.
    pub fn time_in(&self, unit: TimeUnit) -> f64 {
        self.sim.time_in(unit)
    }

    /// Converts `amount` of `unit` into ticks at the configured precision.
    pub fn ticks(&self, amount: u64, unit: TimeUnit) -> SimResult<u64> {
        unit.to_ticks(amount, self.sim.config().precision)
    }

    /// Looks a signal up by name.
    pub fn signal(&self, name: &str) -> SimResult<SignalId> {
        self.sim.signal_id(name)
    }

    /// The last committed value of `signal`.
    pub fn read(&self, signal: SignalId) -> SimResult<Value> {
        self.sim.read(signal)
    }

    /// Stages a write, visible after the current batch commits.
    ///
    /// Fails with `SimError::IllegalWrite` during the ReadOnly phase.
    pub fn write(&mut self, signal: SignalId, value: impl Into<Value>) -> SimResult<()> {
        self.sim.write(signal, value)
    }

    /// Writes an integer, converted to the signal's kind.
    pub fn write_int(&mut self, signal: SignalId, n: u64) -> SimResult<()> {
        self.sim.write_int(signal, n)
    }

    /// Spawns a child task and runs it to its first suspension point before
    /// returning. A failure of the child propagates to this task.
    pub fn spawn(&mut self, name: &str, process: impl Process + 'static) -> TaskId {
        self.sim.spawn_task(name, Some(self.task), Box::new(process))
    }

    /// Cancels another task. A task can not cancel itself.
    pub fn cancel(&mut self, task: TaskId) -> SimResult<()> {
        if task == self.task {
            return Err(SimError::IllegalCancel {
                task: self.sim.task_name(task),
                reason: "a task can not cancel itself",
            });
        }
        self.sim.cancel(task)
    }

    pub fn status(&self, task: TaskId) -> Option<TaskState> {
        self.sim.status(task)
    }

    /// Records the committed values of `signals` in the observation log.
    pub fn observe(&mut self, message: impl Into<String>, signals: &[SignalId]) {
        self.sim.record_observation(self.task, message.into(), signals);
    }
}
