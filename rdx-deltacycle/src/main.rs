use anyhow::Result;
use colored::Colorize;
use deltacycle::labs::flipflop::FlipFlopBench;
use deltacycle::prelude::*;
use deltacycle::{ENGINE_NAME, VERSION};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize structured logging. RUST_LOG overrides the default level.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    // 2. Load the configuration: defaults, optional TOML file, DELTACYCLE_* env.
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = SimConfig::load(config_path.as_deref())?;
    info!("{} v{} (precision {})", ENGINE_NAME, VERSION, config.precision.label());

    // 3. Build the flip-flop bench and start the scripted test.
    let mut bench = FlipFlopBench::new(config)?;
    let top = bench.spawn_demo()?;

    // 4. Count commits per signal from the event stream.
    let listener = spawn_event_listener(&bench.sim);

    // 5. Run the simulation to completion off the async runtime.
    let (report, observations) = tokio::task::spawn_blocking(move || {
        let result = bench.sim.run_until_complete(top);
        let observations = bench.sim.observations().to_vec();
        bench.sim.shutdown();
        result.map(|report| (report, observations))
    })
    .await??;
    let tally = listener.await?;

    for observation in &observations {
        print_observation(observation);
    }
    println!();
    info!(
        "Finished at {} ({:?}): {} batches, {} deltas, {} commits, {} resumptions",
        report.end_time,
        report.reason,
        report.stats.batches,
        report.stats.deltas,
        report.stats.commits,
        report.stats.resumptions
    );
    if tally.dropped > 0 {
        warn!(
            "[COMMITS] listener dropped {} events; the counts below are partial ({} of {} commits seen)",
            tally.dropped,
            tally.commits.values().sum::<u64>(),
            report.stats.commits
        );
    }
    for (signal, count) in &tally.commits {
        info!("[COMMITS] => {} changed {} times", signal, count);
    }
    for task in &report.tasks {
        println!("  {:<14} {}", task.name.cyan(), task.state);
    }
    Ok(())
}

fn print_observation(observation: &Observation) {
    let values: Vec<String> = observation
        .values
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect();
    println!(
        "{} {}  {}",
        format!("[{} {}]", observation.time, observation.phase).dimmed(),
        observation.message.yellow(),
        values.join(", ").bold()
    );
}

/// Committed changes per signal, as seen by the event listener.
#[derive(Default)]
struct CommitTally {
    commits: BTreeMap<String, u64>,
    /// Events lost to a lagging receiver. Non-zero means `commits` is partial.
    dropped: u64,
}

/// Subscribes to the simulator's event stream and tallies committed changes
/// per signal until the engine shuts down.
fn spawn_event_listener(sim: &Simulator) -> tokio::task::JoinHandle<CommitTally> {
    let mut events = sim.subscribe_events();
    tokio::spawn(async move {
        let mut tally = CommitTally::default();
        loop {
            match events.recv().await {
                Ok(SimEvent::SignalCommitted { name, .. }) => *tally.commits.entry(name).or_insert(0) += 1,
                Ok(SimEvent::EngineShutdown) => break,
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    warn!("event listener lagged, {} events dropped", missed);
                    tally.dropped += missed;
                }
                Err(RecvError::Closed) => break,
            }
        }
        tally
    })
}
