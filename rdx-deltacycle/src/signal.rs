//! The signal model: a named, versioned value cell.
//!
//! A signal holds its last committed value and at most one pending write.
//! Writes are staged by tasks and only become visible when the engine
//! commits them at the end of a batch; a commit that changes the value bumps
//! the version and hands back the edge waiters it satisfied.

use crate::common::TaskId;
use crate::error::{SimError, SimResult};
use crate::value::{Edge, SignalKind, Value};

/// A task registered for a transition of one signal.
#[derive(Debug, Clone)]
pub(crate) struct EdgeWaiter {
    pub task: TaskId,
    pub epoch: u64,
    /// Registration order, reused as the wake-up's queue sequence.
    pub seq: u64,
    /// Index of this alternative when the trigger was a race.
    pub slot: Option<usize>,
    pub edge: Edge,
}

/// The outcome of a commit that changed a signal's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub old: Value,
    pub new: Value,
    pub version: u64,
}

/// One wire or register of the model.
#[derive(Debug)]
pub struct Signal {
    name: String,
    kind: SignalKind,
    value: Value,
    pending: Option<Value>,
    version: u64,
    waiters: Vec<EdgeWaiter>,
}

impl Signal {
    pub(crate) fn new(name: &str, kind: SignalKind, initial: Value) -> SimResult<Self> {
        if let SignalKind::Bits(w) = kind {
            if !(1..=64).contains(&w) {
                return Err(SimError::TypeMismatch {
                    signal: name.to_string(),
                    expected: "a width between 1 and 64".to_string(),
                    found: kind.label(),
                });
            }
        }
        let signal = Signal {
            name: name.to_string(),
            kind,
            value: initial,
            pending: None,
            version: 0,
            waiters: Vec::new(),
        };
        signal.check(&initial)?;
        Ok(signal)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &SignalKind {
        &self.kind
    }

    /// The last committed value. Never reflects a pending write.
    #[inline]
    pub fn read(&self) -> Value {
        self.value
    }

    /// Number of commits that changed the value.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The write staged for the next commit, if any.
    pub fn pending(&self) -> Option<Value> {
        self.pending
    }

    /// Number of tasks currently waiting on a transition of this signal.
    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// Renders the committed value for logs.
    pub fn render(&self) -> String {
        self.kind.render(&self.value)
    }

    fn check(&self, value: &Value) -> SimResult<()> {
        if self.kind.accepts(value) {
            Ok(())
        } else {
            Err(SimError::TypeMismatch {
                signal: self.name.clone(),
                expected: self.kind.label(),
                found: format!("{:?}", value),
            })
        }
    }

    /// Stages `value` for the next commit. Only one write is pending per
    /// delta iteration; a second write replaces the first, which is returned.
    pub(crate) fn stage(&mut self, value: Value) -> SimResult<Option<Value>> {
        self.check(&value)?;
        Ok(self.pending.replace(value))
    }

    /// Applies the pending write. Returns the transition when the committed
    /// value changed.
    pub(crate) fn commit(&mut self) -> Option<Transition> {
        let new = self.pending.take()?;
        if new == self.value {
            return None;
        }
        let old = std::mem::replace(&mut self.value, new);
        self.version += 1;
        Some(Transition {
            old,
            new,
            version: self.version,
        })
    }

    pub(crate) fn add_waiter(&mut self, waiter: EdgeWaiter) {
        self.waiters.push(waiter);
    }

    /// Removes and returns, in registration order, every waiter satisfied by
    /// `transition`.
    pub(crate) fn take_matching(&mut self, transition: &Transition) -> Vec<EdgeWaiter> {
        let (fired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.waiters)
            .into_iter()
            .partition(|w| w.edge.matches(&transition.old, &transition.new));
        self.waiters = kept;
        fired
    }

    pub(crate) fn remove_waiters(&mut self, task: TaskId) {
        self.waiters.retain(|w| w.task != task);
    }

    pub(crate) fn clear_waiters(&mut self) {
        self.waiters.clear();
        self.pending = None;
    }
}
