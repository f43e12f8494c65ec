//! The task runner: spawning, suspension, wake-up and completion of tasks.
//!
//! Every suspension gets a fresh epoch. A trigger registers one or more
//! wake-ups tagged with that epoch (queue events, edge waiters, join waiters
//! or next-instant waiters). The first wake-up to be delivered disarms the
//! task and purges the rest, so a race resumes its task exactly once.

use crate::common::{Phase, SimTime, TaskId};
use crate::components::task::{Process, Step, TaskOutcome, TaskState};
use crate::context::Context;
use crate::engine::Simulator;
use crate::error::{SimError, SimResult};
use crate::events::SimEvent;
use crate::queue::Event;
use crate::signal::EdgeWaiter;
use crate::trigger::{Trigger, Wake};
use tracing::{debug, error, trace};

/// One registration of a suspended task.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Waiter {
    pub task: TaskId,
    pub epoch: u64,
    /// Registration order; resumptions sharing a time and phase follow it.
    pub seq: u64,
    /// Index of the alternative when the trigger is a race.
    pub slot: Option<usize>,
}

impl Waiter {
    pub(crate) fn wrap(&self, wake: Wake) -> Wake {
        match self.slot {
            Some(index) => Wake::Race {
                index,
                wake: Box::new(wake),
            },
            None => wake,
        }
    }
}

/// A task failure travelling towards whoever has to handle it.
pub(crate) struct Failure {
    /// Name of the task whose body failed.
    pub origin: String,
    pub time: SimTime,
    pub error: anyhow::Error,
}

/// The scheduler's record of one task.
pub(crate) struct Task {
    pub name: String,
    pub parent: Option<TaskId>,
    pub state: TaskState,
    /// Taken out while the body runs.
    pub process: Option<Box<dyn Process>>,
    pub trigger: Option<Trigger>,
    pub epoch: u64,
    pub armed: bool,
    pub joiners: Vec<Waiter>,
    pub outcome: Option<TaskOutcome>,
    /// A child failure raised while this task was running.
    pub pending_failure: Option<Failure>,
    pub resumptions: u64,
}

impl Task {
    fn new(name: &str, parent: Option<TaskId>, process: Box<dyn Process>) -> Self {
        Self {
            name: name.to_string(),
            parent,
            state: TaskState::Created,
            process: Some(process),
            trigger: None,
            epoch: 0,
            armed: false,
            joiners: Vec::new(),
            outcome: None,
            pending_failure: None,
            resumptions: 0,
        }
    }
}

// --- Internal task-runner implementation ---
impl Simulator {
    pub(crate) fn spawn_task(
        &mut self,
        name: &str,
        parent: Option<TaskId>,
        process: Box<dyn Process>,
    ) -> TaskId {
        let id = self.tasks.insert(Task::new(name, parent, process));
        debug!(task = name, time = %self.now, "task spawned");
        self.emit(SimEvent::TaskSpawned {
            id,
            name: name.to_string(),
        });
        self.resume_task(id, Wake::Start);
        id
    }

    /// Runs one resumption of `id` and files the result.
    pub(crate) fn resume_task(&mut self, id: TaskId, wake: Wake) {
        let Some(task) = self.tasks.get_mut(id) else {
            return;
        };
        let Some(mut process) = task.process.take() else {
            return;
        };
        task.state = TaskState::Running;
        task.trigger = None;
        task.resumptions += 1;
        trace!(task = %task.name, time = %self.now, phase = %self.phase, "resuming task");
        self.stats.resumptions += 1;
        self.emit(SimEvent::TaskResumed {
            id,
            time: self.now,
            phase: self.phase,
        });

        let result = process.resume(&mut Context::new(self, id), wake);

        let Some(task) = self.tasks.get_mut(id) else {
            return;
        };
        task.process = Some(process);
        if let Some(failure) = task.pending_failure.take() {
            self.fail(id, failure);
            return;
        }
        match result {
            Ok(Step::Wait(trigger)) => {
                if let Err(err) = self.suspend(id, trigger) {
                    if err.is_fatal() {
                        let error = anyhow::anyhow!(err.to_string());
                        self.fatal.get_or_insert(err);
                        self.fail_body(id, error);
                    } else {
                        self.fail_body(id, err.into());
                    }
                }
            }
            Ok(Step::Done) => self.finish(id, TaskOutcome::Completed),
            Err(err) => self.fail_body(id, err),
        }
    }

    /// Parks `id` on `trigger`.
    fn suspend(&mut self, id: TaskId, trigger: Trigger) -> SimResult<()> {
        if self.phase == Phase::ReadOnly {
            self.check_settled(&trigger)?;
        }
        let description = self.describe(&trigger);
        let task = self.tasks.get_mut(id).ok_or(SimError::UnknownTask)?;
        task.epoch += 1;
        task.armed = true;
        task.state = TaskState::Suspended;
        task.trigger = Some(trigger.clone());
        let epoch = task.epoch;
        debug!(task = %task.name, time = %self.now, trigger = %description, "task suspended");

        match &trigger {
            Trigger::First(alternatives) => {
                if alternatives.is_empty() {
                    return Err(SimError::IllegalTrigger {
                        trigger: "an empty race".to_string(),
                        phase: self.phase,
                    });
                }
                for (index, alternative) in alternatives.iter().enumerate() {
                    self.register(id, epoch, alternative, Some(index))?;
                }
            }
            other => self.register(id, epoch, other, None)?,
        }
        self.emit(SimEvent::TaskSuspended {
            id,
            trigger: description,
        });
        Ok(())
    }

    /// The ReadOnly phase closes the instant: nothing may be scheduled back
    /// into it.
    fn check_settled(&self, trigger: &Trigger) -> SimResult<()> {
        let reopens_instant = match trigger {
            Trigger::Delay(0) => true,
            Trigger::At(tick) => *tick == self.now.tick,
            Trigger::Phase(phase) => matches!(phase, Phase::ReadWrite | Phase::ReadOnly),
            Trigger::First(alternatives) => {
                return alternatives.iter().try_for_each(|t| self.check_settled(t));
            }
            _ => false,
        };
        if reopens_instant {
            return Err(SimError::IllegalTrigger {
                trigger: self.describe(trigger),
                phase: self.phase,
            });
        }
        Ok(())
    }

    fn register(
        &mut self,
        id: TaskId,
        epoch: u64,
        trigger: &Trigger,
        slot: Option<usize>,
    ) -> SimResult<()> {
        self.next_seq += 1;
        let waiter = Waiter {
            task: id,
            epoch,
            seq: self.next_seq,
            slot,
        };
        match trigger {
            Trigger::Delay(0) => self.schedule(waiter, self.now.next_delta(), Phase::Normal, Wake::Timer),
            Trigger::Delay(ticks) => {
                let time = self.now.after(*ticks).ok_or(SimError::TimeOverflow)?;
                self.schedule(waiter, time, Phase::Normal, Wake::Timer)
            }
            Trigger::At(tick) if *tick == self.now.tick => {
                self.schedule(waiter, self.now.next_delta(), Phase::Normal, Wake::Timer)
            }
            Trigger::At(tick) => self.schedule(waiter, SimTime::at_tick(*tick), Phase::Normal, Wake::Timer),
            Trigger::Edge { signal, edge } => {
                let s = self
                    .signals
                    .get_mut(*signal)
                    .ok_or_else(|| SimError::UnknownSignal(format!("{:?}", signal)))?;
                if !edge.valid_for(s.kind()) {
                    return Err(SimError::InvalidEdge {
                        signal: s.name().to_string(),
                        edge: edge.to_string(),
                    });
                }
                s.add_waiter(EdgeWaiter {
                    task: id,
                    epoch,
                    seq: waiter.seq,
                    slot,
                    edge: *edge,
                });
                Ok(())
            }
            Trigger::Phase(phase @ (Phase::ReadWrite | Phase::ReadOnly)) => {
                self.schedule(waiter, self.now, *phase, Wake::Phase(*phase))
            }
            Trigger::Phase(Phase::NextDelta) => {
                self.next_instant
                    .push((waiter, waiter.wrap(Wake::Phase(Phase::NextDelta))));
                Ok(())
            }
            Trigger::Phase(Phase::Normal) => Err(SimError::IllegalTrigger {
                trigger: "the normal phase".to_string(),
                phase: self.phase,
            }),
            Trigger::Join(target) => {
                if *target == id {
                    return Err(SimError::IllegalTrigger {
                        trigger: "a join on itself".to_string(),
                        phase: self.phase,
                    });
                }
                let joined = self.tasks.get_mut(*target).ok_or(SimError::UnknownTask)?;
                match joined.outcome.clone() {
                    Some(outcome) => self.wake_soon(
                        waiter,
                        Wake::Joined {
                            task: *target,
                            outcome,
                        },
                    ),
                    None => {
                        joined.joiners.push(waiter);
                        Ok(())
                    }
                }
            }
            Trigger::First(_) => Err(SimError::IllegalTrigger {
                trigger: "a nested race".to_string(),
                phase: self.phase,
            }),
        }
    }

    fn schedule(&mut self, waiter: Waiter, time: SimTime, phase: Phase, wake: Wake) -> SimResult<()> {
        self.queue.schedule(Event {
            time,
            phase,
            seq: waiter.seq,
            task: waiter.task,
            epoch: waiter.epoch,
            wake: waiter.wrap(wake),
        })
    }

    /// Wakes `waiter` in the next delta iteration, or at the next instant
    /// when the current one has already settled.
    fn wake_soon(&mut self, waiter: Waiter, wake: Wake) -> SimResult<()> {
        if self.phase == Phase::ReadOnly {
            self.next_instant.push((waiter, waiter.wrap(wake)));
            Ok(())
        } else {
            self.schedule(waiter, self.now.next_delta(), Phase::Normal, wake)
        }
    }

    /// Delivers a wake-up. Returns `false` for a stale or already-won
    /// registration.
    pub(crate) fn claim(&mut self, id: TaskId, epoch: u64) -> bool {
        let Some(task) = self.tasks.get_mut(id) else {
            return false;
        };
        if task.state != TaskState::Suspended || task.epoch != epoch || !task.armed {
            return false;
        }
        task.armed = false;
        // A single registration is consumed by its own delivery; only the
        // losers of a race are still registered.
        if let Some(trigger @ Trigger::First(_)) = task.trigger.take() {
            self.purge(id, &trigger);
        }
        true
    }

    /// Drops the registrations `id` still holds for `trigger`.
    fn purge(&mut self, id: TaskId, trigger: &Trigger) {
        let alternatives = match trigger {
            Trigger::First(list) => list.as_slice(),
            other => std::slice::from_ref(other),
        };
        let mut queued = false;
        let mut next_instant = false;
        for alternative in alternatives {
            match alternative {
                Trigger::Delay(_) | Trigger::At(_) => queued = true,
                Trigger::Phase(Phase::NextDelta) => next_instant = true,
                Trigger::Phase(_) => queued = true,
                Trigger::Edge { signal, .. } => {
                    // A fired edge waits in the queue for the next delta.
                    queued = true;
                    if let Some(s) = self.signals.get_mut(*signal) {
                        s.remove_waiters(id);
                    }
                }
                Trigger::Join(target) => {
                    queued = true;
                    next_instant = true;
                    if let Some(joined) = self.tasks.get_mut(*target) {
                        joined.joiners.retain(|w| w.task != id);
                    }
                }
                Trigger::First(_) => {}
            }
        }
        if queued {
            self.queue.remove_task(id);
        }
        if next_instant {
            self.next_instant.retain(|(w, _)| w.task != id);
        }
    }

    /// Moves `id` to a terminal state and wakes the tasks joining it.
    pub(crate) fn finish(&mut self, id: TaskId, outcome: TaskOutcome) {
        let Some(task) = self.tasks.get_mut(id) else {
            return;
        };
        task.state = outcome.state();
        task.outcome = Some(outcome.clone());
        task.armed = false;
        task.process = None;
        let trigger = task.trigger.take();
        let joiners = std::mem::take(&mut task.joiners);
        debug!(task = %task.name, time = %self.now, state = %task.state, "task finished");
        if let Some(trigger) = trigger {
            self.purge(id, &trigger);
        }

        self.emit(match &outcome {
            TaskOutcome::Completed => SimEvent::TaskCompleted { id },
            TaskOutcome::Cancelled => SimEvent::TaskCancelled { id },
            TaskOutcome::Failed { message } => SimEvent::TaskFailed {
                id,
                message: message.clone(),
            },
        });
        for waiter in joiners {
            let wake = Wake::Joined {
                task: id,
                outcome: outcome.clone(),
            };
            if let Err(err) = self.wake_soon(waiter, wake) {
                self.fatal.get_or_insert(err);
            }
        }
    }

    /// Fails `id` because its own body returned an error.
    fn fail_body(&mut self, id: TaskId, error: anyhow::Error) {
        let origin = self
            .tasks
            .get(id)
            .map(|t| t.name.clone())
            .unwrap_or_default();
        let failure = Failure {
            origin,
            time: self.now,
            error,
        };
        self.fail(id, failure);
    }

    /// Fails `id` and hands the failure to whoever must see it: the tasks
    /// joining it if there are any, else its living parent, else the harness.
    fn fail(&mut self, id: TaskId, failure: Failure) {
        let Some(task) = self.tasks.get(id) else {
            return;
        };
        let message = format!("{:#}", failure.error);
        error!(task = %task.name, origin = %failure.origin, time = %failure.time, "task failed: {}", message);
        let handled = !task.joiners.is_empty();
        let parent = task.parent;
        self.finish(id, TaskOutcome::Failed { message });
        if handled {
            return;
        }

        let living_parent = parent.and_then(|p| {
            let state = self.tasks.get(p)?.state;
            (!state.is_terminal()).then_some((p, state))
        });
        match living_parent {
            Some((p, TaskState::Running)) => {
                if let Some(parent) = self.tasks.get_mut(p) {
                    parent.pending_failure.get_or_insert(failure);
                }
            }
            Some((p, _)) => self.fail(p, failure),
            None => {
                self.abort.get_or_insert(failure);
            }
        }
    }

    /// Renders a trigger with signal and task names.
    pub(crate) fn describe(&self, trigger: &Trigger) -> String {
        match trigger {
            Trigger::Edge { signal, edge } => match self.signals.get(*signal) {
                Some(s) => format!("{} edge of `{}`", edge, s.name()),
                None => trigger.to_string(),
            },
            Trigger::Join(task) => match self.tasks.get(*task) {
                Some(t) => format!("join(`{}`)", t.name),
                None => trigger.to_string(),
            },
            Trigger::First(alternatives) => {
                let parts: Vec<String> = alternatives.iter().map(|t| self.describe(t)).collect();
                format!("first({})", parts.join(", "))
            }
            other => other.to_string(),
        }
    }
}
