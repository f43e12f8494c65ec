//! # Deltacycle
//!
//! A discrete-event, delta-cycle scheduler for digital-logic testbenches.
//!
//! Deltacycle advances simulated time, runs cooperatively suspended tasks in
//! a fixed phase order, and decides when a signal write becomes visible.
//! It is a library a harness uses to drive a model and to assert on what its
//! tasks observed.
//!
//! ## Core Concepts
//!
//! - **Signals**: named, versioned value cells with a fixed kind. Writes are
//!   staged and only become visible when the engine commits them after a
//!   batch of task resumptions.
//! - **Phased instants**: every simulated instant runs Normal batches (one per
//!   delta iteration) until no more work is pending, then ReadWrite, then
//!   ReadOnly. Tasks waiting for the next instant resume before its first
//!   Normal pass.
//! - **Tasks**: explicit continuations implementing `Process`. A task runs
//!   until it returns `Step::Wait(trigger)` and is resumed with a `Wake`
//!   describing what fired.
//! - **Deterministic order**: tasks resumed at the same time and phase run
//!   in the order their triggers were registered.
//!
//! ## Example Usage
//!
//! ```rust
//! use deltacycle::prelude::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut sim = Simulator::new(SimConfig::default());
//! let clk = sim.add_signal("clk", SignalKind::Bit, false)?;
//! let count = sim.add_signal("count", SignalKind::Bits(8), Value::bits(8, 0))?;
//!
//! // A counter that increments on every rising edge of `clk`.
//! sim.spawn("counter", from_fn(move |cx, wake| {
//!     if let Wake::Edge { .. } = wake {
//!         let n = cx.read(count)?.as_u64();
//!         cx.write_int(count, n + 1)?;
//!     }
//!     Ok(Step::Wait(rising_edge(clk)))
//! }));
//! sim.spawn("clock", Clock::new(clk, 10, false)?);
//!
//! sim.advance(100)?;
//! // Rising edges at 5, 15, ..., 95.
//! assert_eq!(sim.read(count)?.as_u64(), 10);
//! # Ok(())
//! # }
//! ```

pub const ENGINE_NAME: &str = "Deltacycle Engine";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Declare all the modules in the crate.
pub mod common;
pub mod components;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod labs;
pub mod queue;
mod scheduler;
pub mod signal;
pub mod trigger;
pub mod value;

/// A prelude module for easy importing of the most common Deltacycle types.
pub mod prelude {
    pub use crate::common::{Phase, SignalId, SimTime, TaskId};
    pub use crate::components::clock::Clock;
    pub use crate::components::task::{
        from_fn, Process, RepetitionPolicy, Sequence, Step, TaskOutcome, TaskState,
    };
    pub use crate::config::{SimConfig, TimeUnit};
    pub use crate::context::Context;
    pub use crate::engine::{RunReport, RunStats, Simulator, StepOutcome, StopReason, TaskSummary};
    pub use crate::error::{SimError, SimResult};
    pub use crate::events::{Observation, SimEvent};
    pub use crate::trigger::{
        after, at, falling_edge, first, join, next_delta, on_edge, read_only, read_write,
        rising_edge, value_change, Trigger, Wake,
    };
    pub use crate::value::{Edge, SignalKind, Value};
}
