//! The flip-flop lab: a registered D flip-flop driven by a 1 ns clock, and
//! a scripted test that shows when writes become visible.
//!
//! The script assigns `d` at various points of an instant and then waits on
//! an edge or a phase marker, observing `clk`, `d` and `q` after each wait.

use crate::common::{SignalId, TaskId};
use crate::components::clock::Clock;
use crate::components::task::{from_fn, Process, RepetitionPolicy, Sequence, Step};
use crate::config::{SimConfig, TimeUnit};
use crate::context::Context;
use crate::engine::Simulator;
use crate::error::SimResult;
use crate::trigger::{next_delta, read_only, read_write, rising_edge, Wake};
use crate::value::{SignalKind, Value};

/// The flip-flop body: on every rising edge of `clk`, copy `d` to `q`.
pub fn flip_flop(clk: SignalId, d: SignalId, q: SignalId) -> impl Process {
    from_fn(move |cx, wake| {
        if let Wake::Edge { .. } = wake {
            let sampled = cx.read(d)?;
            cx.write(q, sampled)?;
        }
        Ok(Step::Wait(rising_edge(clk)))
    })
}

/// A simulator holding `clk`, `d`, `q` and a running flip-flop.
pub struct FlipFlopBench {
    pub sim: Simulator,
    pub clk: SignalId,
    pub d: SignalId,
    pub q: SignalId,
    pub dff: TaskId,
    /// Clock period in ticks (1 ns at the configured precision).
    pub period: u64,
}

impl FlipFlopBench {
    /// Builds the model. `clk` powers up high so the first rising edge falls
    /// one full period after time zero.
    pub fn new(config: SimConfig) -> SimResult<Self> {
        let period = TimeUnit::Ns.to_ticks(1, config.precision)?;
        let mut sim = Simulator::new(config);
        let clk = sim.add_signal("clk", SignalKind::Bit, true)?;
        let d = sim.add_signal("d", SignalKind::Bit, false)?;
        let q = sim.add_signal("q", SignalKind::Bit, false)?;
        let dff = sim.spawn("dff", flip_flop(clk, d, q));
        Ok(Self {
            sim,
            clk,
            d,
            q,
            dff,
            period,
        })
    }

    /// Starts the scripted test as a top-level task.
    pub fn spawn_demo(&mut self) -> SimResult<TaskId> {
        let demo = delta_cycle_demo(self.clk, self.d, self.q, self.period)?;
        Ok(self.sim.spawn("delta_cycles", demo))
    }
}

/// Writes the complement of `d` and logs the value written.
fn toggle(cx: &mut Context<'_>, d: SignalId, observed: &[SignalId]) -> anyhow::Result<()> {
    let next = !cx.read(d)?.is_high();
    cx.write(d, next)?;
    cx.observe(
        format!("assigned {} to d, visible only after the next wait", Value::Bit(next)),
        observed,
    );
    Ok(())
}

/// Builds the scripted delta-cycle test.
///
/// The script starts the clock itself, so `clk` should not be driven by
/// anything else.
pub fn delta_cycle_demo(clk: SignalId, d: SignalId, q: SignalId, period: u64) -> SimResult<Sequence> {
    let clock = Clock::new(clk, period, true)?;
    let signals = [clk, d, q];

    let demo = Sequence::new(RepetitionPolicy::RunOnce)
        .step(move |cx, _| {
            cx.observe("starting flip-flop test, initial values", &signals);
            cx.spawn("clock", clock.clone());
            cx.write(d, true)?;
            cx.observe("assigned 1 to d, visible only after the next wait", &signals);
            Ok(Step::Wait(rising_edge(clk)))
        })
        .step(move |cx, _| {
            cx.observe("after the first rising edge d is updated, q is not", &signals);
            Ok(Step::Wait(rising_edge(clk)))
        })
        .step(move |cx, _| {
            cx.observe("after the second rising edge q is updated", &signals);
            toggle(cx, d, &signals)?;
            Ok(Step::Wait(rising_edge(clk)))
        })
        .step(move |cx, _| {
            cx.observe("after the rising edge d is updated, q is not", &signals);
            Ok(Step::Wait(read_only()))
        })
        .step(move |cx, _| {
            cx.observe("at ReadOnly q is updated", &signals);
            Ok(Step::Wait(rising_edge(clk)))
        })
        .step(move |cx, _| {
            toggle(cx, d, &signals)?;
            Ok(Step::Wait(rising_edge(clk)))
        })
        .step(move |cx, _| {
            cx.observe("after the rising edge d is updated, q is not", &signals);
            Ok(Step::Wait(next_delta()))
        })
        .step(move |cx, _| {
            cx.observe("at the next instant q is updated", &signals);
            toggle(cx, d, &signals)?;
            Ok(Step::Wait(rising_edge(clk)))
        })
        .step(move |cx, _| {
            cx.observe("after the rising edge d is updated, q is not", &signals);
            Ok(Step::Wait(read_write()))
        })
        .step(move |cx, _| {
            cx.observe("at ReadWrite q is updated", &signals);
            toggle(cx, d, &signals)?;
            Ok(Step::Wait(read_only()))
        })
        .step(move |cx, _| {
            cx.observe("at ReadOnly the ReadWrite assignment to d is visible", &signals);
            Ok(Step::Wait(rising_edge(clk)))
        })
        .step(move |_, _| Ok(Step::Wait(next_delta())))
        .step(move |cx, _| {
            toggle(cx, d, &signals)?;
            Ok(Step::Wait(read_write()))
        })
        .step(move |cx, _| {
            cx.observe("at ReadWrite the assignment made at the start of the instant is visible", &signals);
            Ok(Step::Wait(rising_edge(clk)))
        })
        .step(move |_, _| Ok(Step::Wait(next_delta())))
        .step(move |cx, _| {
            toggle(cx, d, &signals)?;
            Ok(Step::Wait(next_delta()))
        })
        .step(move |cx, _| {
            cx.observe("at the following instant the assignment to d is visible", &signals);
            Ok(Step::Done)
        });
    Ok(demo)
}
