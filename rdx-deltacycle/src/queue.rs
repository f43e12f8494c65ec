//! The event queue: pending task resumptions in total order.
//!
//! Uses a `BinaryHeap` with reversed `Ord` on `Event` to act as a min-heap
//! keyed by `(tick, phase rank, delta, sequence)`. Sequence numbers are
//! handed out at trigger registration, so resumptions sharing a time and
//! phase come back in registration order.

use crate::common::{Phase, SimTime, TaskId};
use crate::error::{SimError, SimResult};
use crate::trigger::Wake;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// One scheduled resumption of a task.
#[derive(Debug, Clone)]
pub struct Event {
    pub time: SimTime,
    pub phase: Phase,
    pub seq: u64,
    pub task: TaskId,
    /// The suspension this event belongs to; stale epochs are dropped.
    pub(crate) epoch: u64,
    pub wake: Wake,
}

impl Event {
    #[inline]
    fn key(&self) -> (u64, Phase, u32, u64) {
        (self.time.tick, self.phase, self.time.delta, self.seq)
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Event {}

/// Ordering: smallest key first. `BinaryHeap` is a max-heap, so the
/// natural ordering is reversed here.
impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending resumptions, never rewinding past `floor`.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Event>,
    floor: SimTime,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the causality floor to the engine's current time.
    pub(crate) fn set_floor(&mut self, now: SimTime) {
        self.floor = now;
    }

    /// Inserts an event.
    ///
    /// Normal-phase events must lie strictly after the floor; phase-marker
    /// events may target any delta of the current tick.
    pub fn schedule(&mut self, event: Event) -> SimResult<()> {
        let in_past = event.time.tick < self.floor.tick
            || (event.phase == Phase::Normal && event.time <= self.floor);
        if in_past {
            return Err(SimError::CausalityViolation {
                requested: event.time,
                current: self.floor,
            });
        }
        self.heap.push(event);
        Ok(())
    }

    /// The `(time, phase)` of the next event without removing it.
    pub fn peek_key(&self) -> Option<(SimTime, Phase)> {
        self.heap.peek().map(|e| (e.time, e.phase))
    }

    /// Removes every event due at `(time.tick, phase)` with a delta no later
    /// than `time.delta`, in queue order. Returns an empty batch if none.
    pub fn pop_ready_batch(&mut self, time: SimTime, phase: Phase) -> Vec<Event> {
        let mut batch = Vec::new();
        while let Some(head) = self.heap.peek() {
            if head.time.tick != time.tick || head.phase != phase || head.time.delta > time.delta {
                break;
            }
            if let Some(event) = self.heap.pop() {
                batch.push(event);
            }
        }
        batch
    }

    /// Drops every pending event of `task`.
    pub(crate) fn remove_task(&mut self, task: TaskId) {
        self.heap.retain(|e| e.task != task);
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.heap.clear();
        self.floor = SimTime::ZERO;
    }
}
