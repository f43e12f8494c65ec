//! The phase engine that orchestrates a simulation run.
//!
//! Each simulated instant is a delta-iteration loop. Normal-phase batches
//! run once per delta, ReadWrite runs once Normal is exhausted, ReadOnly
//! observes the settled instant, and tasks waiting for the next instant are
//! resumed when time advances, before that instant's first Normal pass.
//! Pending signal writes are committed after every batch.

use crate::common::{Phase, SignalId, SimTime, TaskId};
use crate::components::task::{Process, TaskOutcome, TaskState};
use crate::config::{SimConfig, TimeUnit};
use crate::error::{SimError, SimResult};
use crate::events::{Observation, SimEvent};
use crate::queue::{Event, EventQueue};
use crate::scheduler::{Failure, Task, Waiter};
use crate::signal::Signal;
use crate::trigger::Wake;
use crate::value::{SignalKind, Value};
use slotmap::SlotMap;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

/// Counters accumulated over the life of a simulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Phase batches run, including next-instant batches.
    pub batches: u64,
    /// Delta iterations entered.
    pub deltas: u64,
    /// Commits that changed a signal's value.
    pub commits: u64,
    /// Task resumptions, including first runs.
    pub resumptions: u64,
}

/// Why a run returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The awaited task finished.
    Completed,
    /// Nothing is left to run.
    Idle,
    /// The next instant lies beyond `max_time`.
    TimeLimit,
    /// `advance` reached its target instant.
    TimeReached,
}

/// One task, as seen from outside the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSummary {
    pub id: TaskId,
    pub name: String,
    pub state: TaskState,
    /// The trigger a suspended task is waiting on.
    pub waiting_on: Option<String>,
    pub outcome: Option<TaskOutcome>,
    pub resumptions: u64,
}

/// The result of a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub end_time: SimTime,
    pub reason: StopReason,
    pub stats: RunStats,
    pub tasks: Vec<TaskSummary>,
    /// Tasks still suspended when the run stopped.
    pub stalled: Vec<TaskSummary>,
}

/// What a single `step` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A batch of `resumed` tasks ran at `time` in `phase`.
    Batch {
        time: SimTime,
        phase: Phase,
        resumed: usize,
    },
    /// Time moved to a new instant with nobody waiting for it.
    Advanced { time: SimTime },
    Idle,
    TimeLimit,
}

/// The discrete-event delta-cycle simulator.
///
/// Owns the signals, the tasks and the event queue. Everything runs on the
/// caller's thread: task bodies are resumed one at a time, in a
/// deterministic order.
pub struct Simulator {
    pub(crate) config: SimConfig,
    pub(crate) now: SimTime,
    /// Phase of the batch running or last run.
    pub(crate) phase: Phase,
    /// Whether a batch of resumptions is running.
    pub(crate) in_batch: bool,
    pub(crate) queue: EventQueue,
    pub(crate) signals: SlotMap<SignalId, Signal>,
    signal_names: HashMap<String, SignalId>,
    pub(crate) tasks: SlotMap<TaskId, Task>,
    /// Wake-ups held for the start of the next instant.
    pub(crate) next_instant: Vec<(Waiter, Wake)>,
    /// Signals with a pending write, in first-write order.
    dirty: Vec<SignalId>,
    pub(crate) next_seq: u64,
    observations: Vec<Observation>,
    event_sender: broadcast::Sender<SimEvent>,
    pub(crate) stats: RunStats,
    /// A failure no task handled; ends the run after the current batch.
    pub(crate) abort: Option<Failure>,
    /// A fatal engine error raised while a task was being scheduled.
    pub(crate) fatal: Option<SimError>,
}

impl Simulator {
    /// Creates a simulator at time zero with no signals and no tasks.
    pub fn new(config: SimConfig) -> Self {
        let (event_sender, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            now: SimTime::ZERO,
            phase: Phase::Normal,
            in_batch: false,
            queue: EventQueue::new(),
            signals: SlotMap::with_key(),
            signal_names: HashMap::new(),
            tasks: SlotMap::with_key(),
            next_instant: Vec::new(),
            dirty: Vec::new(),
            next_seq: 0,
            observations: Vec::new(),
            event_sender,
            stats: RunStats::default(),
            abort: None,
            fatal: None,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Current simulated time expressed in `unit`.
    pub fn time_in(&self, unit: TimeUnit) -> f64 {
        unit.from_ticks(self.now.tick, self.config.precision)
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    // --- Signals ---

    /// Adds a signal to the model.
    pub fn add_signal(
        &mut self,
        name: &str,
        kind: SignalKind,
        initial: impl Into<Value>,
    ) -> SimResult<SignalId> {
        if self.signal_names.contains_key(name) {
            return Err(SimError::DuplicateSignal(name.to_string()));
        }
        let signal = Signal::new(name, kind, initial.into())?;
        let id = self.signals.insert(signal);
        self.signal_names.insert(name.to_string(), id);
        debug!(signal = name, "signal added");
        Ok(id)
    }

    pub fn signal_id(&self, name: &str) -> SimResult<SignalId> {
        self.signal_names
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownSignal(name.to_string()))
    }

    pub fn signal(&self, id: SignalId) -> Option<&Signal> {
        self.signals.get(id)
    }

    /// Every signal, in the order they were added.
    pub fn signals(&self) -> impl Iterator<Item = (SignalId, &Signal)> + '_ {
        self.signals.iter()
    }

    fn signal_ref(&self, id: SignalId) -> SimResult<&Signal> {
        self.signals
            .get(id)
            .ok_or_else(|| SimError::UnknownSignal(format!("{:?}", id)))
    }

    /// The last committed value of `id`.
    pub fn read(&self, id: SignalId) -> SimResult<Value> {
        Ok(self.signal_ref(id)?.read())
    }

    /// Number of value-changing commits of `id`.
    pub fn version(&self, id: SignalId) -> SimResult<u64> {
        Ok(self.signal_ref(id)?.version())
    }

    /// Stages a write to `id`. It becomes visible when the current batch
    /// commits, or at the start of the next step when written from outside
    /// a task.
    ///
    /// Only a running ReadOnly batch rejects writes. A harness write made
    /// after a ReadOnly batch reopens the instant as Normal work.
    pub fn write(&mut self, id: SignalId, value: impl Into<Value>) -> SimResult<()> {
        let value = value.into();
        self.reopen_for_harness();
        let signal = self
            .signals
            .get_mut(id)
            .ok_or_else(|| SimError::UnknownSignal(format!("{:?}", id)))?;
        if !self.phase.allows_writes() {
            return Err(SimError::IllegalWrite {
                signal: signal.name().to_string(),
                phase: self.phase,
                time: self.now,
            });
        }
        match signal.stage(value)? {
            Some(replaced) => warn!(
                signal = %signal.name(),
                time = %self.now,
                "pending write {} replaced by {}", replaced, value
            ),
            None => self.dirty.push(id),
        }
        Ok(())
    }

    /// Writes an integer, converted to the signal's kind.
    pub fn write_int(&mut self, id: SignalId, n: u64) -> SimResult<()> {
        let signal = self.signal_ref(id)?;
        let value = signal
            .kind()
            .value_from_u64(n)
            .ok_or_else(|| SimError::TypeMismatch {
                signal: signal.name().to_string(),
                expected: signal.kind().label(),
                found: n.to_string(),
            })?;
        self.write(id, value)
    }

    // --- Tasks ---

    /// Spawns a top-level task and runs it to its first suspension point.
    ///
    /// A failure of the task, or a fatal error raised while scheduling it,
    /// is reported by the next call that runs the simulation.
    pub fn spawn(&mut self, name: &str, process: impl Process + 'static) -> TaskId {
        self.reopen_for_harness();
        self.spawn_task(name, None, Box::new(process))
    }

    pub fn status(&self, id: TaskId) -> Option<TaskState> {
        self.tasks.get(id).map(|t| t.state)
    }

    pub fn task_name(&self, id: TaskId) -> String {
        self.tasks
            .get(id)
            .map(|t| t.name.clone())
            .unwrap_or_default()
    }

    /// How a finished task ended.
    pub fn outcome(&self, id: TaskId) -> Option<TaskOutcome> {
        self.tasks.get(id).and_then(|t| t.outcome.clone())
    }

    /// Cancels a suspended task: its registrations are dropped and its body
    /// never runs again. Cancelling a finished task does nothing.
    pub fn cancel(&mut self, id: TaskId) -> SimResult<()> {
        let task = self.tasks.get(id).ok_or(SimError::UnknownTask)?;
        match task.state {
            TaskState::Running => Err(SimError::IllegalCancel {
                task: task.name.clone(),
                reason: "its body is running",
            }),
            state if state.is_terminal() => Ok(()),
            _ => {
                info!(task = %task.name, time = %self.now, "cancelling task");
                self.finish(id, TaskOutcome::Cancelled);
                Ok(())
            }
        }
    }

    pub fn tasks(&self) -> Vec<TaskSummary> {
        self.tasks
            .iter()
            .map(|(id, task)| TaskSummary {
                id,
                name: task.name.clone(),
                state: task.state,
                waiting_on: task.trigger.as_ref().map(|t| self.describe(t)),
                outcome: task.outcome.clone(),
                resumptions: task.resumptions,
            })
            .collect()
    }

    /// Drops the records of finished tasks and returns how many went.
    ///
    /// A reaped task is unknown afterwards: `status` and `outcome` return
    /// `None` and joining it fails with `UnknownTask`.
    pub fn reap_finished(&mut self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, task| !task.state.is_terminal());
        let reaped = before - self.tasks.len();
        if reaped > 0 {
            debug!(reaped, time = %self.now, "reaped finished tasks");
        }
        reaped
    }

    // --- Observations and events ---

    /// The observation log, in recording order.
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Subscribes to the `SimEvent` stream.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SimEvent> {
        self.event_sender.subscribe()
    }

    pub(crate) fn emit(&self, event: SimEvent) {
        self.event_sender.send(event).ok();
    }

    pub(crate) fn record_observation(&mut self, task: TaskId, message: String, signals: &[SignalId]) {
        let values = signals
            .iter()
            .filter_map(|id| self.signals.get(*id))
            .map(|s| (s.name().to_string(), s.read()))
            .collect();
        let observation = Observation {
            time: self.now,
            phase: self.phase,
            task: self.task_name(task),
            message,
            values,
        };
        info!("{}", observation);
        if self.config.record_observations {
            self.observations.push(observation.clone());
        }
        self.emit(SimEvent::Observed(observation));
    }

    /// The `(time, phase)` of the next queued resumption.
    pub fn peek_next(&self) -> Option<(SimTime, Phase)> {
        self.queue.peek_key()
    }

    /// Number of queued resumptions, not counting next-instant waiters.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    // --- Running ---

    /// Runs exactly one batch, or enters the next instant.
    pub fn step(&mut self) -> SimResult<StepOutcome> {
        self.check_abort()?;
        let outcome = self.advance_batch()?;
        self.check_abort()?;
        Ok(outcome)
    }

    /// Runs until nothing is left to do or `max_time` is reached.
    ///
    /// A free-running clock never goes idle; bound such runs with
    /// `max_time` or use `run_until_complete`.
    pub fn run(&mut self) -> SimResult<RunReport> {
        info!(time = %self.now, "simulation running");
        let reason = loop {
            match self.step()? {
                StepOutcome::Idle => break StopReason::Idle,
                StepOutcome::TimeLimit => break StopReason::TimeLimit,
                _ => {}
            }
        };
        let report = self.report(reason);
        for task in &report.stalled {
            warn!(
                task = %task.name,
                waiting_on = task.waiting_on.as_deref().unwrap_or("nothing"),
                "task stalled"
            );
        }
        info!(time = %self.now, reason = ?reason, "simulation stopped");
        Ok(report)
    }

    /// Runs until `top` finishes.
    ///
    /// Fails with `UnresolvedTrigger` when `top` is suspended and nothing
    /// else can happen, and with `TaskFailed` when an unhandled task failure
    /// reaches the harness.
    pub fn run_until_complete(&mut self, top: TaskId) -> SimResult<RunReport> {
        info!(time = %self.now, "simulation running until task completes");
        loop {
            let state = self.status(top).ok_or(SimError::UnknownTask)?;
            if state.is_terminal() {
                self.check_abort()?;
                info!(time = %self.now, state = %state, "awaited task finished");
                return Ok(self.report(StopReason::Completed));
            }
            match self.step()? {
                StepOutcome::Idle => {
                    let (name, trigger) = self
                        .tasks
                        .get(top)
                        .map(|t| {
                            let trigger = t
                                .trigger
                                .as_ref()
                                .map(|tr| self.describe(tr))
                                .unwrap_or_else(|| "nothing".to_string());
                            (t.name.clone(), trigger)
                        })
                        .unwrap_or_default();
                    return Err(SimError::UnresolvedTrigger {
                        task: name,
                        trigger,
                        time: self.now,
                    });
                }
                StepOutcome::TimeLimit => return Ok(self.report(StopReason::TimeLimit)),
                _ => {}
            }
        }
    }

    /// Runs every instant before `now + ticks`, then enters that instant,
    /// resuming the tasks waiting for it.
    pub fn advance(&mut self, ticks: u64) -> SimResult<RunReport> {
        let target = self
            .now
            .tick
            .checked_add(ticks)
            .ok_or(SimError::TimeOverflow)?;
        loop {
            self.commit()?;
            match self.queue.peek_key() {
                Some((time, _)) if time.tick < target => {}
                _ => break,
            }
            match self.step()? {
                StepOutcome::TimeLimit => return Ok(self.report(StopReason::TimeLimit)),
                StepOutcome::Idle => break,
                _ => {}
            }
        }
        if self.now.tick < target {
            if self.beyond_limit(target) {
                return Ok(self.report(StopReason::TimeLimit));
            }
            self.check_abort()?;
            self.enter_instant(target)?;
            self.check_abort()?;
        }
        Ok(self.report(StopReason::TimeReached))
    }

    /// Drops every task and pending wake-up and rewinds time to zero.
    /// Signals keep their committed values.
    pub fn shutdown(&mut self) {
        info!(time = %self.now, tasks = self.tasks.len(), "simulator shutting down");
        self.tasks.clear();
        self.queue.clear();
        self.next_instant.clear();
        for (_, signal) in self.signals.iter_mut() {
            signal.clear_waiters();
        }
        self.dirty.clear();
        self.now = SimTime::ZERO;
        self.phase = Phase::Normal;
        self.in_batch = false;
        self.abort = None;
        self.fatal = None;
        self.emit(SimEvent::EngineShutdown);
    }

    pub fn report(&self, reason: StopReason) -> RunReport {
        let tasks = self.tasks();
        let stalled = tasks
            .iter()
            .filter(|t| t.state == TaskState::Suspended)
            .cloned()
            .collect();
        RunReport {
            end_time: self.now,
            reason,
            stats: self.stats,
            tasks,
            stalled,
        }
    }
}

// --- Internal phase-engine implementation ---
impl Simulator {
    /// Work started from outside a batch joins the Normal phase of the
    /// current instant.
    fn reopen_for_harness(&mut self) {
        if !self.in_batch && self.phase == Phase::ReadOnly {
            debug!(time = %self.now, "harness work after read_only, reopening the instant");
            self.phase = Phase::Normal;
        }
    }

    fn check_abort(&mut self) -> SimResult<()> {
        if let Some(err) = self.fatal.take() {
            return Err(err);
        }
        if let Some(failure) = self.abort.take() {
            return Err(SimError::TaskFailed {
                task: failure.origin,
                time: failure.time,
                source: failure.error,
            });
        }
        Ok(())
    }

    fn beyond_limit(&self, tick: u64) -> bool {
        self.config.max_time.map_or(false, |limit| tick > limit)
    }

    fn advance_batch(&mut self) -> SimResult<StepOutcome> {
        self.commit()?;
        let head = self.queue.peek_key();
        let target = match head {
            Some((time, phase)) if time.tick == self.now.tick => {
                return self.run_queued_batch(time, phase);
            }
            Some((time, _)) => time.tick,
            None if !self.next_instant.is_empty() => self
                .now
                .tick
                .checked_add(1)
                .ok_or(SimError::TimeOverflow)?,
            None => return Ok(StepOutcome::Idle),
        };
        if self.beyond_limit(target) {
            return Ok(StepOutcome::TimeLimit);
        }
        self.enter_instant(target)
    }

    /// Moves time to `tick` and resumes the tasks waiting for a new instant.
    fn enter_instant(&mut self, tick: u64) -> SimResult<StepOutcome> {
        self.now = SimTime::at_tick(tick);
        self.queue.set_floor(self.now);
        debug!(time = %self.now, "time advanced");
        self.emit(SimEvent::TimeAdvanced { time: self.now });

        let mut waiters = std::mem::take(&mut self.next_instant);
        if waiters.is_empty() {
            self.phase = Phase::Normal;
            return Ok(StepOutcome::Advanced { time: self.now });
        }
        waiters.sort_by_key(|(w, _)| w.seq);
        self.phase = Phase::NextDelta;
        let resumed = self.run_batch(waiters.into_iter().map(|(w, wake)| (w.task, w.epoch, wake)));
        self.commit()?;
        Ok(StepOutcome::Batch {
            time: self.now,
            phase: Phase::NextDelta,
            resumed,
        })
    }

    fn run_queued_batch(&mut self, time: SimTime, phase: Phase) -> SimResult<StepOutcome> {
        let limit = self.config.max_deltas;
        if phase == Phase::Normal {
            if time.delta > limit {
                return Err(SimError::DeltaOverflow {
                    tick: time.tick,
                    limit,
                });
            }
            self.stats.deltas += u64::from(time.delta.saturating_sub(self.now.delta));
            self.now = time;
        } else if self.phase == phase {
            // A second batch of the same marker phase is a new delta iteration.
            if self.now.delta >= limit {
                return Err(SimError::DeltaOverflow {
                    tick: time.tick,
                    limit,
                });
            }
            self.now = self.now.next_delta();
            self.stats.deltas += 1;
        }
        self.queue.set_floor(self.now);
        self.phase = phase;

        let events: Vec<Event> = self.queue.pop_ready_batch(self.now, phase);
        let resumed = self.run_batch(events.into_iter().map(|e| (e.task, e.epoch, e.wake)));
        self.commit()?;
        if let Some(err) = self.fatal.take() {
            return Err(err);
        }
        Ok(StepOutcome::Batch {
            time: self.now,
            phase,
            resumed,
        })
    }

    /// Resumes each live wake-up of a batch in order. Every member runs even
    /// if an earlier one failed.
    fn run_batch(&mut self, wakes: impl Iterator<Item = (TaskId, u64, Wake)>) -> usize {
        self.stats.batches += 1;
        trace!(time = %self.now, phase = %self.phase, "running batch");
        self.emit(SimEvent::PhaseEntered {
            time: self.now,
            phase: self.phase,
        });
        let mut resumed = 0;
        self.in_batch = true;
        for (task, epoch, wake) in wakes {
            if self.claim(task, epoch) {
                resumed += 1;
                self.resume_task(task, wake);
            }
        }
        self.in_batch = false;
        resumed
    }

    /// Applies every pending write and schedules the edge wake-ups they
    /// satisfy for the next delta iteration.
    fn commit(&mut self) -> SimResult<()> {
        let dirty = std::mem::take(&mut self.dirty);
        let wake_time = self.now.next_delta();
        for id in dirty {
            let Some(signal) = self.signals.get_mut(id) else {
                continue;
            };
            let Some(transition) = signal.commit() else {
                continue;
            };
            self.stats.commits += 1;
            let name = signal.name().to_string();
            debug!(signal = %name, time = %self.now, "{} -> {}", transition.old, transition.new);
            let fired = signal.take_matching(&transition);
            for waiter in fired {
                let wake = Wake::Edge {
                    signal: id,
                    value: transition.new,
                };
                let wake = match waiter.slot {
                    Some(index) => Wake::Race {
                        index,
                        wake: Box::new(wake),
                    },
                    None => wake,
                };
                self.queue.schedule(Event {
                    time: wake_time,
                    phase: Phase::Normal,
                    seq: waiter.seq,
                    task: waiter.task,
                    epoch: waiter.epoch,
                    wake,
                })?;
            }
            self.emit(SimEvent::SignalCommitted {
                time: self.now,
                signal: id,
                name,
                value: transition.new,
            });
        }
        Ok(())
    }
}
