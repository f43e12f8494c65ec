use deltacycle::prelude::*;
use std::sync::{Arc, Mutex};

fn sim() -> Simulator {
    Simulator::new(SimConfig::default())
}

fn messages(sim: &Simulator) -> Vec<String> {
    sim.observations().iter().map(|o| o.message.clone()).collect()
}

#[test]
fn test_edge_wakeup_lands_in_next_delta() {
    let mut sim = sim();
    let a = sim.add_signal("a", SignalKind::Bit, false).unwrap();

    sim.spawn("watcher", from_fn(move |cx, wake| match wake {
        Wake::Start => Ok(Step::Wait(rising_edge(a))),
        _ => {
            cx.observe("edge", &[a]);
            Ok(Step::Done)
        }
    }));
    sim.spawn("writer", from_fn(move |cx, wake| match wake {
        Wake::Start => Ok(Step::Wait(after(10))),
        _ => {
            cx.write(a, true)?;
            cx.observe("wrote", &[a]);
            Ok(Step::Done)
        }
    }));
    sim.run().unwrap();

    let log = sim.observations();
    assert_eq!(messages(&sim), vec!["wrote", "edge"]);
    assert_eq!(log[0].time, SimTime::new(10, 0));
    assert_eq!(log[0].value("a"), Some(Value::Bit(false)));
    assert_eq!(log[1].time, SimTime::new(10, 1));
    assert_eq!(log[1].value("a"), Some(Value::Bit(true)));
    assert_eq!(sim.version(a).unwrap(), 1);
}

#[test]
fn test_read_only_rejects_writes_and_keeps_value() {
    let mut sim = sim();
    let a = sim.add_signal("a", SignalKind::Bit, false).unwrap();
    let top = sim.spawn("top", from_fn(move |cx, wake| match wake {
        Wake::Start => {
            cx.write(a, true)?;
            Ok(Step::Wait(read_only()))
        }
        _ => {
            let err = cx.write(a, false).unwrap_err();
            cx.observe(err.as_label(), &[a]);
            Ok(Step::Done)
        }
    }));
    sim.run_until_complete(top).unwrap();

    let log = sim.observations();
    assert_eq!(log[0].message, "illegal_write");
    assert_eq!(log[0].phase, Phase::ReadOnly);
    assert_eq!(log[0].value("a"), Some(Value::Bit(true)));
    assert_eq!(sim.read(a).unwrap(), Value::Bit(true));
    assert_eq!(sim.signal(a).unwrap().pending(), None);
}

#[test]
fn test_unhandled_illegal_write_fails_the_run() {
    let mut sim = sim();
    let a = sim.add_signal("a", SignalKind::Bit, false).unwrap();
    let top = sim.spawn("top", from_fn(move |cx, wake| match wake {
        Wake::Start => Ok(Step::Wait(read_only())),
        _ => {
            cx.write(a, true)?;
            Ok(Step::Done)
        }
    }));
    match sim.run_until_complete(top) {
        Err(SimError::TaskFailed { task, source, .. }) => {
            assert_eq!(task, "top");
            assert!(matches!(
                source.downcast_ref::<SimError>(),
                Some(SimError::IllegalWrite { .. })
            ));
        }
        other => panic!("expected a task failure, got {:?}", other),
    }
    assert_eq!(sim.read(a).unwrap(), Value::Bit(false));
    assert_eq!(sim.status(top), Some(TaskState::Failed));
}

#[test]
fn test_read_write_runs_before_read_only() {
    let mut sim = sim();
    let a = sim.add_signal("a", SignalKind::Bit, false).unwrap();
    sim.spawn("observer", from_fn(move |cx, wake| match wake {
        Wake::Start => Ok(Step::Wait(read_only())),
        _ => {
            cx.observe("read_only", &[a]);
            Ok(Step::Done)
        }
    }));
    sim.spawn("writer", from_fn(move |cx, wake| match wake {
        Wake::Start => Ok(Step::Wait(read_write())),
        _ => {
            cx.observe("read_write", &[a]);
            cx.write(a, true)?;
            Ok(Step::Done)
        }
    }));
    sim.run().unwrap();

    let log = sim.observations();
    assert_eq!(messages(&sim), vec!["read_write", "read_only"]);
    assert_eq!(log[0].phase, Phase::ReadWrite);
    assert_eq!(log[0].value("a"), Some(Value::Bit(false)));
    assert_eq!(log[1].phase, Phase::ReadOnly);
    assert_eq!(log[1].value("a"), Some(Value::Bit(true)));
}

#[test]
fn test_read_only_waits_for_delta_writers() {
    // A ReadOnly observer registered early still runs after every edge
    // reaction of the instant has committed.
    let mut sim = sim();
    let clk = sim.add_signal("clk", SignalKind::Bit, false).unwrap();
    let q = sim.add_signal("q", SignalKind::Bits(4), Value::bits(4, 0)).unwrap();
    sim.spawn("observer", from_fn(move |cx, wake| match wake {
        Wake::Start => Ok(Step::Wait(after(5))),
        Wake::Timer => Ok(Step::Wait(read_only())),
        _ => {
            cx.observe("settled", &[q]);
            Ok(Step::Done)
        }
    }));
    sim.spawn("stage1", from_fn(move |cx, wake| {
        if let Wake::Edge { .. } = wake {
            cx.write_int(q, 1)?;
        }
        Ok(Step::Wait(rising_edge(clk)))
    }));
    sim.spawn("stage2", from_fn(move |cx, wake| {
        if let Wake::Edge { value, .. } = wake {
            if value.as_u64() == 1 {
                cx.write_int(q, 2)?;
            }
        }
        Ok(Step::Wait(on_edge(q, Edge::To(Value::bits(4, 1)))))
    }));
    sim.spawn("driver", from_fn(move |cx, wake| match wake {
        Wake::Start => Ok(Step::Wait(after(5))),
        _ => {
            cx.write(clk, true)?;
            Ok(Step::Done)
        }
    }));
    sim.run().unwrap();

    let log = sim.observations();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].time, SimTime::new(5, 2));
    assert_eq!(log[0].value("q").map(Value::as_u64), Some(2));
}

#[test]
fn test_next_delta_differs_from_read_write() {
    let mut sim = sim();
    let a = sim.add_signal("a", SignalKind::Bit, false).unwrap();
    let script = Sequence::new(RepetitionPolicy::RunOnce)
        .step(|_, _| Ok(Step::Wait(after(5))))
        .step(|_, _| Ok(Step::Wait(read_write())))
        .step(move |cx, _| {
            cx.observe("read_write", &[a]);
            cx.write(a, true)?;
            Ok(Step::Wait(next_delta()))
        })
        .step(move |cx, _| {
            cx.observe("next_delta", &[a]);
            Ok(Step::Done)
        });
    let top = sim.spawn("top", script);
    sim.run_until_complete(top).unwrap();

    let log = sim.observations();
    assert_eq!(log[0].time.tick, 5);
    assert_eq!(log[0].value("a"), Some(Value::Bit(false)));
    assert_eq!(log[1].phase, Phase::NextDelta);
    assert_eq!(log[1].time, SimTime::new(6, 0));
    assert_eq!(log[1].value("a"), Some(Value::Bit(true)));
}

#[test]
fn test_next_delta_resumes_before_normal_pass() {
    let mut sim = sim();
    let a = sim.add_signal("a", SignalKind::Bit, false).unwrap();
    sim.spawn("late", from_fn(move |cx, wake| match wake {
        Wake::Start => Ok(Step::Wait(after(10))),
        _ => {
            cx.observe("normal", &[a]);
            Ok(Step::Done)
        }
    }));
    sim.spawn("early", from_fn(move |cx, wake| match wake {
        Wake::Start => Ok(Step::Wait(next_delta())),
        _ => {
            cx.write(a, true)?;
            cx.observe("next_delta", &[a]);
            Ok(Step::Done)
        }
    }));
    sim.run().unwrap();

    let log = sim.observations();
    assert_eq!(messages(&sim), vec!["next_delta", "normal"]);
    assert_eq!(log[0].time, SimTime::new(10, 0));
    assert_eq!(log[1].value("a"), Some(Value::Bit(true)));
}

#[test]
fn test_read_is_idempotent_within_a_phase() {
    let mut sim = sim();
    let a = sim.add_signal("a", SignalKind::Bits(8), Value::bits(8, 7)).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    sim.spawn("top", from_fn(move |cx, _| {
        let mut seen = log.lock().unwrap();
        seen.push(cx.read(a)?);
        cx.write_int(a, 9)?;
        seen.push(cx.read(a)?);
        seen.push(cx.read(a)?);
        Ok(Step::Done)
    }));
    sim.run().unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![Value::bits(8, 7); 3]);
    assert_eq!(sim.read(a).unwrap().as_u64(), 9);
}

#[test]
fn test_same_time_resumes_in_registration_order() {
    let mut sim = sim();
    let clk = sim.add_signal("clk", SignalKind::Bit, false).unwrap();
    for name in ["c", "b", "a"] {
        sim.spawn(name, from_fn(move |cx, wake| match wake {
            Wake::Start => Ok(Step::Wait(rising_edge(clk))),
            _ => {
                cx.observe("edge", &[]);
                Ok(Step::Done)
            }
        }));
    }
    sim.spawn("driver", from_fn(move |cx, wake| match wake {
        Wake::Start => Ok(Step::Wait(after(1))),
        _ => {
            cx.write(clk, true)?;
            Ok(Step::Done)
        }
    }));
    sim.run().unwrap();

    let order: Vec<&str> = sim.observations().iter().map(|o| o.task.as_str()).collect();
    assert_eq!(order, vec!["c", "b", "a"]);
}

#[test]
fn test_timeout_race() {
    let mut sim = sim();
    let a = sim.add_signal("a", SignalKind::Bit, false).unwrap();
    let wakes = Arc::new(Mutex::new(Vec::new()));
    let log = wakes.clone();
    let top = sim.spawn("racer", from_fn(move |_, wake| match wake {
        Wake::Start => Ok(Step::Wait(first([rising_edge(a), after(100)]))),
        other => {
            log.lock().unwrap().push(other);
            Ok(Step::Done)
        }
    }));
    let report = sim.run_until_complete(top).unwrap();

    assert_eq!(report.end_time.tick, 100);
    let wakes = wakes.lock().unwrap();
    assert_eq!(wakes.len(), 1);
    assert_eq!(wakes[0].race_index(), Some(1));
    assert_eq!(wakes[0].inner(), &Wake::Timer);
    assert_eq!(sim.signal(a).unwrap().waiter_count(), 0);
}

#[test]
fn test_race_loser_is_removed() {
    let mut sim = sim();
    let a = sim.add_signal("a", SignalKind::Bit, false).unwrap();
    let wakes = Arc::new(Mutex::new(Vec::new()));
    let log = wakes.clone();
    sim.spawn("racer", from_fn(move |_, wake| match wake {
        Wake::Start => Ok(Step::Wait(first([rising_edge(a), after(100)]))),
        other => {
            log.lock().unwrap().push(other);
            Ok(Step::Done)
        }
    }));
    sim.spawn("driver", from_fn(move |cx, wake| match wake {
        Wake::Start => Ok(Step::Wait(after(20))),
        _ => {
            cx.write(a, true)?;
            Ok(Step::Done)
        }
    }));
    let report = sim.run().unwrap();

    assert_eq!(report.reason, StopReason::Idle);
    assert_eq!(report.end_time, SimTime::new(20, 1));
    let wakes = wakes.lock().unwrap();
    assert_eq!(
        *wakes,
        vec![Wake::Race {
            index: 0,
            wake: Box::new(Wake::Edge {
                signal: a,
                value: Value::Bit(true)
            }),
        }]
    );
    assert_eq!(sim.pending_events(), 0);
}

#[test]
fn test_cancel_from_another_task() {
    let mut sim = sim();
    let victim = sim.spawn("victim", from_fn(|cx, wake| match wake {
        Wake::Start => Ok(Step::Wait(after(50))),
        _ => {
            cx.observe("victim ran", &[]);
            Ok(Step::Done)
        }
    }));
    let watcher = sim.spawn("watcher", from_fn(move |cx, wake| match wake {
        Wake::Start => Ok(Step::Wait(join(victim))),
        Wake::Joined { outcome, .. } => {
            cx.observe(format!("{:?}", outcome), &[]);
            Ok(Step::Done)
        }
        _ => Ok(Step::Done),
    }));
    sim.spawn("canceller", from_fn(move |cx, wake| match wake {
        Wake::Start => Ok(Step::Wait(after(10))),
        _ => {
            cx.cancel(victim)?;
            Ok(Step::Done)
        }
    }));
    let report = sim.run().unwrap();

    assert_eq!(sim.status(victim), Some(TaskState::Cancelled));
    assert_eq!(sim.status(watcher), Some(TaskState::Completed));
    assert_eq!(messages(&sim), vec!["Cancelled"]);
    assert_eq!(sim.observations()[0].time, SimTime::new(10, 1));
    assert_eq!(report.end_time.tick, 10);
}

#[test]
fn test_cancel_rules() {
    let mut sim = sim();
    let top = sim.spawn("top", from_fn(|cx, _| {
        let err = cx.cancel(cx.task()).unwrap_err();
        cx.observe(err.as_label(), &[]);
        Ok(Step::Wait(after(5)))
    }));
    assert_eq!(messages(&sim), vec!["illegal_cancel"]);

    sim.cancel(top).unwrap();
    assert_eq!(sim.status(top), Some(TaskState::Cancelled));
    // Cancelling a finished task is a no-op.
    sim.cancel(top).unwrap();
    let report = sim.run().unwrap();
    assert_eq!(report.end_time.tick, 0);
    assert_eq!(sim.observations().len(), 1);
}

#[test]
fn test_join_reports_child_failure() {
    let mut sim = sim();
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let log = outcomes.clone();
    let top = sim.spawn("parent", from_fn(move |cx, wake| match wake {
        Wake::Start => {
            let child = cx.spawn("child", from_fn(|_, wake| match wake {
                Wake::Start => Ok(Step::Wait(after(5))),
                _ => anyhow::bail!("child exploded"),
            }));
            Ok(Step::Wait(join(child)))
        }
        Wake::Joined { outcome, .. } => {
            log.lock().unwrap().push((cx.now(), outcome));
            Ok(Step::Done)
        }
        _ => Ok(Step::Done),
    }));
    let report = sim.run_until_complete(top).unwrap();

    assert_eq!(report.reason, StopReason::Completed);
    assert_eq!(
        *outcomes.lock().unwrap(),
        vec![(
            SimTime::new(5, 1),
            TaskOutcome::Failed {
                message: "child exploded".to_string()
            }
        )]
    );
}

#[test]
fn test_failure_propagates_after_sibling_batch() {
    let mut sim = sim();
    let top = sim.spawn("top", from_fn(|cx, wake| match wake {
        Wake::Start => {
            cx.spawn("child", from_fn(|_, wake| match wake {
                Wake::Start => Ok(Step::Wait(after(5))),
                _ => anyhow::bail!("boom"),
            }));
            Ok(Step::Wait(after(100)))
        }
        _ => Ok(Step::Done),
    }));
    sim.spawn("sibling", from_fn(|cx, wake| match wake {
        Wake::Start => Ok(Step::Wait(after(5))),
        _ => {
            cx.observe("sibling finished its step", &[]);
            Ok(Step::Done)
        }
    }));

    match sim.run_until_complete(top) {
        Err(SimError::TaskFailed { task, time, source }) => {
            assert_eq!(task, "child");
            assert_eq!(time, SimTime::new(5, 0));
            assert_eq!(source.to_string(), "boom");
        }
        other => panic!("expected a task failure, got {:?}", other),
    }
    assert_eq!(messages(&sim), vec!["sibling finished its step"]);
    assert_eq!(sim.status(top), Some(TaskState::Failed));
}

#[test]
fn test_unresolved_trigger_is_reported() {
    let mut sim = sim();
    let a = sim.add_signal("a", SignalKind::Bit, false).unwrap();
    let top = sim.spawn("top", from_fn(move |_, _| Ok(Step::Wait(rising_edge(a)))));
    match sim.run_until_complete(top) {
        Err(SimError::UnresolvedTrigger { task, trigger, .. }) => {
            assert_eq!(task, "top");
            assert!(trigger.contains("`a`"), "{}", trigger);
        }
        other => panic!("expected an unresolved trigger, got {:?}", other),
    }
}

#[test]
fn test_idle_run_lists_stalled_tasks() {
    let mut sim = sim();
    let a = sim.add_signal("a", SignalKind::Bit, false).unwrap();
    sim.spawn("waiter", from_fn(move |_, _| Ok(Step::Wait(falling_edge(a)))));
    let report = sim.run().unwrap();
    assert_eq!(report.reason, StopReason::Idle);
    assert_eq!(report.stalled.len(), 1);
    assert_eq!(report.stalled[0].waiting_on.as_deref(), Some("falling edge of `a`"));
}

#[test]
fn test_scheduling_in_the_past_is_fatal() {
    let mut sim = sim();
    sim.spawn("time_traveller", from_fn(|_, wake| match wake {
        Wake::Start => Ok(Step::Wait(after(10))),
        _ => Ok(Step::Wait(at(5))),
    }));
    match sim.run() {
        Err(SimError::CausalityViolation { requested, current }) => {
            assert_eq!(requested, SimTime::at_tick(5));
            assert_eq!(current, SimTime::at_tick(10));
        }
        other => panic!("expected a causality violation, got {:?}", other),
    }
}

#[test]
fn test_max_time_bounds_a_free_running_clock() {
    let mut sim = Simulator::new(SimConfig::default().with_max_time(50));
    let clk = sim.add_signal("clk", SignalKind::Bit, false).unwrap();
    sim.spawn("clock", Clock::new(clk, 10, false).unwrap());
    let report = sim.run().unwrap();
    assert_eq!(report.reason, StopReason::TimeLimit);
    assert_eq!(report.end_time.tick, 50);
    // Toggles at 5, 10, ..., 50.
    assert_eq!(sim.version(clk).unwrap(), 10);
}

#[test]
fn test_runaway_delta_loop_overflows() {
    let config = SimConfig {
        max_deltas: 100,
        ..SimConfig::default()
    };
    let mut sim = Simulator::new(config);
    sim.spawn("spinner", from_fn(|_, _| Ok(Step::Wait(after(0)))));
    match sim.run() {
        Err(SimError::DeltaOverflow { tick, limit }) => {
            assert_eq!((tick, limit), (0, 100));
        }
        other => panic!("expected a delta overflow, got {:?}", other),
    }
}

#[test]
fn test_no_reopening_the_instant_from_read_only() {
    let mut sim = sim();
    let top = sim.spawn("top", from_fn(|_, wake| match wake {
        Wake::Start => Ok(Step::Wait(read_only())),
        _ => Ok(Step::Wait(read_write())),
    }));
    match sim.run_until_complete(top) {
        Err(SimError::TaskFailed { source, .. }) => assert!(matches!(
            source.downcast_ref::<SimError>(),
            Some(SimError::IllegalTrigger { phase: Phase::ReadOnly, .. })
        )),
        other => panic!("expected an illegal trigger, got {:?}", other),
    }
}

#[test]
fn test_sequence_repeats_n_times() {
    let mut sim = sim();
    let script = Sequence::new(RepetitionPolicy::RunNTimes(3))
        .step(|cx, _| {
            cx.observe("a", &[]);
            Ok(Step::Wait(after(1)))
        })
        .step(|cx, _| {
            cx.observe("b", &[]);
            Ok(Step::Wait(after(1)))
        });
    let top = sim.spawn("script", script);
    let report = sim.run_until_complete(top).unwrap();
    assert_eq!(messages(&sim), vec!["a", "b", "a", "b", "a", "b"]);
    assert_eq!(report.end_time.tick, 6);
}

#[test]
fn test_sequence_that_never_suspends_fails() {
    let mut sim = sim();
    let script = Sequence::new(RepetitionPolicy::Repeat).step(|_, _| Ok(Step::Done));
    let top = sim.spawn("spin", script);
    assert!(matches!(
        sim.run_until_complete(top),
        Err(SimError::TaskFailed { .. })
    ));
}

#[test]
fn test_enum_edge_to_value() {
    let mut sim = sim();
    let kind = SignalKind::Enum(vec!["idle".into(), "busy".into(), "done".into()]);
    let state = sim.add_signal("state", kind, Value::Enum(0)).unwrap();
    let top = sim.spawn("top", from_fn(move |cx, wake| match wake {
        Wake::Start => Ok(Step::Wait(on_edge(state, Edge::To(Value::Enum(2))))),
        _ => {
            cx.observe("done", &[state]);
            Ok(Step::Done)
        }
    }));
    let script = Sequence::new(RepetitionPolicy::RunOnce)
        .step(|_, _| Ok(Step::Wait(after(1))))
        .step(move |cx, _| {
            cx.write(state, Value::Enum(1))?;
            Ok(Step::Wait(after(1)))
        })
        .step(move |cx, _| {
            cx.write_int(state, 2)?;
            Ok(Step::Done)
        });
    sim.spawn("driver", script);
    sim.run_until_complete(top).unwrap();

    let log = sim.observations();
    assert_eq!(log[0].time, SimTime::new(2, 1));
    assert_eq!(sim.signal(state).unwrap().render(), "done");
}

#[test]
fn test_rising_edge_on_a_bus_is_invalid() {
    let mut sim = sim();
    let bus = sim.add_signal("bus", SignalKind::Bits(8), Value::bits(8, 0)).unwrap();
    let top = sim.spawn("top", from_fn(move |_, _| Ok(Step::Wait(rising_edge(bus)))));
    match sim.run_until_complete(top) {
        Err(SimError::TaskFailed { source, .. }) => assert!(matches!(
            source.downcast_ref::<SimError>(),
            Some(SimError::InvalidEdge { .. })
        )),
        other => panic!("expected an invalid edge, got {:?}", other),
    }
}

#[test]
fn test_advance_runs_harness_writes_and_enters_target() {
    let mut sim = sim();
    let a = sim.add_signal("a", SignalKind::Bit, false).unwrap();
    sim.spawn("watcher", from_fn(move |cx, wake| match wake {
        Wake::Start => Ok(Step::Wait(value_change(a))),
        Wake::Edge { .. } => {
            cx.observe("changed", &[a]);
            Ok(Step::Wait(next_delta()))
        }
        _ => {
            cx.observe("next instant", &[a]);
            Ok(Step::Done)
        }
    }));
    sim.write(a, true).unwrap();
    let report = sim.advance(1500).unwrap();

    assert_eq!(report.reason, StopReason::TimeReached);
    assert_eq!(sim.now(), SimTime::at_tick(1500));
    let log = sim.observations();
    assert_eq!(log[0].time, SimTime::new(0, 1));
    assert_eq!(log[1].time, SimTime::at_tick(1500));
    assert_eq!(sim.time_in(TimeUnit::Ns), 1.5);
}

#[test]
fn test_step_reports_each_batch() {
    let mut sim = sim();
    sim.spawn("t", from_fn(|_, wake| match wake {
        Wake::Start => Ok(Step::Wait(after(4))),
        Wake::Timer => Ok(Step::Wait(read_only())),
        _ => Ok(Step::Done),
    }));
    assert_eq!(sim.step().unwrap(), StepOutcome::Advanced { time: SimTime::at_tick(4) });
    assert_eq!(
        sim.step().unwrap(),
        StepOutcome::Batch {
            time: SimTime::at_tick(4),
            phase: Phase::Normal,
            resumed: 1
        }
    );
    assert_eq!(
        sim.step().unwrap(),
        StepOutcome::Batch {
            time: SimTime::at_tick(4),
            phase: Phase::ReadOnly,
            resumed: 1
        }
    );
    assert_eq!(sim.step().unwrap(), StepOutcome::Idle);
}

#[test]
fn test_event_stream_and_shutdown() {
    let mut sim = sim();
    let mut events = sim.subscribe_events();
    let a = sim.add_signal("a", SignalKind::Bit, false).unwrap();
    sim.spawn("writer", from_fn(move |cx, _| {
        cx.write(a, true)?;
        cx.observe("wrote", &[a]);
        Ok(Step::Done)
    }));
    sim.run().unwrap();
    sim.shutdown();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen.first(), Some(SimEvent::TaskSpawned { name, .. }) if name == "writer"));
    assert!(seen
        .iter()
        .any(|e| matches!(e, SimEvent::SignalCommitted { name, value: Value::Bit(true), .. } if name == "a")));
    assert!(seen.iter().any(|e| matches!(e, SimEvent::Observed(o) if o.message == "wrote")));
    assert!(matches!(seen.last(), Some(SimEvent::EngineShutdown)));
    assert!(sim.tasks().is_empty());
    assert_eq!(sim.now(), SimTime::ZERO);
    assert_eq!(sim.read(a).unwrap(), Value::Bit(true));
}

#[test]
fn test_harness_work_after_read_only_reopens_the_instant() {
    let mut sim = sim();
    let d = sim.add_signal("d", SignalKind::Bit, false).unwrap();
    let b = sim.add_signal("b", SignalKind::Bit, false).unwrap();
    let top = sim.spawn("top", from_fn(|_, wake| match wake {
        Wake::Start => Ok(Step::Wait(read_only())),
        _ => Ok(Step::Done),
    }));
    sim.run_until_complete(top).unwrap();
    assert_eq!(sim.phase(), Phase::ReadOnly);

    sim.write(d, true).unwrap();
    assert_eq!(sim.phase(), Phase::Normal);
    sim.spawn("watcher", from_fn(move |cx, wake| match wake {
        Wake::Start => Ok(Step::Wait(value_change(d))),
        _ => {
            cx.observe("d changed", &[d]);
            Ok(Step::Done)
        }
    }));
    let writer = sim.spawn("writer", from_fn(move |cx, _| {
        cx.write(b, true)?;
        Ok(Step::Done)
    }));
    assert_eq!(sim.status(writer), Some(TaskState::Completed));
    sim.run().unwrap();

    assert_eq!(sim.read(d).unwrap(), Value::Bit(true));
    assert_eq!(sim.read(b).unwrap(), Value::Bit(true));
    let log = sim.observations();
    assert_eq!(log[0].message, "d changed");
    assert_eq!(log[0].time, SimTime::new(0, 1));
}

#[test]
fn test_cancelled_clock_stops_toggling() {
    let mut sim = sim();
    let clk = sim.add_signal("clk", SignalKind::Bit, false).unwrap();
    let clock = sim.spawn("clock", Clock::new(clk, 10, false).unwrap());
    sim.advance(25).unwrap();
    // Toggles at 5, 10, 15 and 20; the one due at 25 is still queued.
    assert_eq!(sim.version(clk).unwrap(), 4);

    sim.cancel(clock).unwrap();
    let version = sim.version(clk).unwrap();
    assert_eq!(sim.pending_events(), 0);
    sim.advance(50).unwrap();

    assert_eq!(sim.version(clk).unwrap(), version);
    assert_eq!(sim.status(clock), Some(TaskState::Cancelled));
    assert_eq!(sim.now().tick, 75);
}

#[test]
fn test_many_tasks_then_reap() {
    let mut sim = sim();
    let ids: Vec<_> = (0..5000)
        .map(|i| {
            sim.spawn(&format!("t{i}"), from_fn(|_, wake| match wake {
                Wake::Start => Ok(Step::Wait(after(1))),
                _ => Ok(Step::Done),
            }))
        })
        .collect();
    let report = sim.run().unwrap();

    assert_eq!(report.end_time.tick, 1);
    assert_eq!(report.stats.resumptions, 10_000);
    assert!(ids.iter().all(|&id| sim.status(id) == Some(TaskState::Completed)));
    assert_eq!(sim.reap_finished(), 5000);
    assert!(sim.tasks().is_empty());
    assert_eq!(sim.status(ids[0]), None);
    assert_eq!(sim.reap_finished(), 0);
}

#[test]
fn test_join_race_loser_is_not_woken_later() {
    let mut sim = sim();
    let worker = sim.spawn("worker", from_fn(|_, wake| match wake {
        Wake::Start => Ok(Step::Wait(after(50))),
        _ => Ok(Step::Done),
    }));
    let wakes = Arc::new(Mutex::new(Vec::new()));
    let log = wakes.clone();
    sim.spawn("impatient", from_fn(move |_, wake| match wake {
        Wake::Start => Ok(Step::Wait(first([join(worker), after(10)]))),
        other => {
            log.lock().unwrap().push(other);
            Ok(Step::Done)
        }
    }));
    let report = sim.run().unwrap();

    assert_eq!(report.end_time.tick, 50);
    assert_eq!(sim.status(worker), Some(TaskState::Completed));
    let wakes = wakes.lock().unwrap();
    assert_eq!(wakes.len(), 1);
    assert_eq!(wakes[0].race_index(), Some(1));
}

#[test]
fn test_joining_a_reaped_task_is_unknown() {
    let mut sim = sim();
    let quick = sim.spawn("quick", from_fn(|_, _| Ok(Step::Done)));
    assert_eq!(sim.reap_finished(), 1);
    let top = sim.spawn("top", from_fn(move |_, _| Ok(Step::Wait(join(quick)))));
    match sim.run_until_complete(top) {
        Err(SimError::TaskFailed { source, .. }) => assert!(matches!(
            source.downcast_ref::<SimError>(),
            Some(SimError::UnknownTask)
        )),
        other => panic!("expected an unknown task, got {:?}", other),
    }
}
