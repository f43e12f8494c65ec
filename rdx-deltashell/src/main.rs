use anyhow::Result;
use colored::Colorize;
use deltacycle::labs::flipflop::FlipFlopBench;
use deltacycle::prelude::*;
use deltacycle::{ENGINE_NAME, VERSION as LIB_VERSION};
use rustyline::highlight::Highlighter;
use rustyline::Editor;
use rustyline_derive::{Completer, Helper, Hinter, Validator};
use std::borrow::Cow;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SHELL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A custom helper struct for rustyline that enables syntax highlighting.
#[derive(Completer, Helper, Hinter, Validator)]
struct MyHighlighter;

impl Highlighter for MyHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if let Some((command, rest)) = line.split_once(' ') {
            let colored_command = command.yellow().bold();
            let colored_rest = rest.yellow();
            Cow::Owned(format!("{} {}", colored_command, colored_rest))
        } else {
            Cow::Owned(line.yellow().bold().to_string())
        }
    }
    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

fn print_banner() {
    if env::var("QUIET_MODE").is_ok() {
        return;
    }
    println!("{}", format!("  {}", ENGINE_NAME).cyan().bold());
    println!("{}", "-".repeat(64).dimmed());
    println!(
        "          Shell   v{:<8} Library   v{:<8}",
        SHELL_VERSION, LIB_VERSION
    );
    let license_blurb = "
    This software is provided 'as is', without warranty of any kind.
    Distributed under the MIT OR Apache-2.0 license. Use at your own risk.
    ";
    println!("{}", license_blurb.dimmed());
    println!("{}", "-".repeat(64).dimmed());
}

fn print_help() {
    println!("Available commands:");
    println!("  demo                  - Spawns the delta-cycle script (once per bench).");
    println!("  run                   - Runs until the script finishes.");
    println!("  step                  - Runs one batch, or enters the next instant.");
    println!("  advance <TICKS>       - Runs every instant up to now + TICKS.");
    println!("  next                  - Shows the next queued resumption.");
    println!("  peek <SIGNAL>         - Shows a signal's value, version and pending write.");
    println!("  poke <SIGNAL> <N>     - Stages a write, committed by the next step.");
    println!("  signals               - Lists every signal.");
    println!("  tasks                 - Lists every task and what it waits on.");
    println!("  cancel <TASK>         - Cancels a suspended task by name.");
    println!("  log                   - Prints the whole observation log.");
    println!("  time                  - Shows the current time and phase.");
    println!("  trace on|off          - Starts or stops printing the raw event stream.");
    println!("  reset                 - Shuts the simulator down and rebuilds the bench.");
    println!("  exit                  - Quits the shell.");
}

/// Prints every engine event while `is_tracing` is set, until the simulator
/// shuts down.
fn spawn_event_listener(sim: &Simulator, is_tracing: Arc<AtomicBool>) {
    let mut events = sim.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SimEvent::EngineShutdown) => break,
                // The shell prints observations itself.
                Ok(SimEvent::Observed(_)) => {}
                Ok(event) => {
                    if is_tracing.load(Ordering::Relaxed) {
                        println!("{}", format!("<-- [EVENT] {:?}", event).dimmed());
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    if is_tracing.load(Ordering::Relaxed) {
                        println!("<-- [EVENT] {} events dropped", missed);
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn print_observation(observation: &Observation) {
    println!(
        "{} {}",
        format!("[{} {}] {}:", observation.time, observation.phase, observation.task).dimmed(),
        observation.message.yellow()
    );
    if !observation.values.is_empty() {
        let values: Vec<String> = observation
            .values
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        println!("      {}", values.join("  ").bold());
    }
}

/// The simulator being driven plus the shell's bookkeeping around it.
struct Session {
    bench: FlipFlopBench,
    demo: Option<TaskId>,
    /// Observations already printed.
    printed: usize,
}

impl Session {
    fn new(config: SimConfig, is_tracing: Arc<AtomicBool>) -> Result<Self> {
        let bench = FlipFlopBench::new(config)?;
        spawn_event_listener(&bench.sim, is_tracing);
        Ok(Self {
            bench,
            demo: None,
            printed: 0,
        })
    }

    fn sim(&mut self) -> &mut Simulator {
        &mut self.bench.sim
    }

    /// Prints the observations recorded since the last call.
    fn flush_observations(&mut self) {
        for observation in &self.bench.sim.observations()[self.printed..] {
            print_observation(observation);
        }
        self.printed = self.bench.sim.observations().len();
    }

    fn report(&self, report: &RunReport) {
        println!(
            "--> {:?} at {}: {} batches, {} deltas, {} commits",
            report.reason,
            report.end_time,
            report.stats.batches,
            report.stats.deltas,
            report.stats.commits
        );
        for task in &report.stalled {
            println!(
                "    {} waiting on {}",
                task.name.cyan(),
                task.waiting_on.as_deref().unwrap_or("nothing")
            );
        }
    }

    fn demo(&mut self) -> SimResult<()> {
        if self.demo.is_some() {
            println!("--> The script was already spawned on this bench. Use 'reset' first.");
            return Ok(());
        }
        let top = self.bench.spawn_demo()?;
        self.demo = Some(top);
        println!("--> Spawned `delta_cycles`.");
        Ok(())
    }

    fn run(&mut self) -> SimResult<()> {
        let Some(top) = self.demo else {
            println!("--> Nothing to wait for. Spawn the script with 'demo' or use 'advance'.");
            return Ok(());
        };
        let report = self.sim().run_until_complete(top)?;
        self.report(&report);
        Ok(())
    }

    fn step(&mut self) -> SimResult<()> {
        match self.sim().step()? {
            StepOutcome::Batch {
                time,
                phase,
                resumed,
            } => println!("--> {} {}: resumed {} task(s)", time, phase, resumed),
            StepOutcome::Advanced { time } => println!("--> Advanced to {}", time),
            StepOutcome::Idle => println!("--> Idle: nothing is scheduled."),
            StepOutcome::TimeLimit => println!("--> Stopped at the configured time limit."),
        }
        Ok(())
    }

    fn peek(&self, name: &str) -> SimResult<()> {
        let sim = &self.bench.sim;
        let id = sim.signal_id(name)?;
        if let Some(signal) = sim.signal(id) {
            let pending = signal
                .pending()
                .map(|v| signal.kind().render(&v))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {} = {}  (version {}, pending {})",
                name.cyan(),
                signal.render().bold(),
                signal.version(),
                pending
            );
        }
        Ok(())
    }

    fn poke(&mut self, name: &str, n: u64) -> SimResult<()> {
        let id = self.sim().signal_id(name)?;
        self.sim().write_int(id, n)?;
        println!("--> Staged {} <= {}; it commits on the next step.", name, n);
        Ok(())
    }

    fn cancel(&mut self, name: &str) -> SimResult<()> {
        let target = self
            .bench
            .sim
            .tasks()
            .into_iter()
            .find(|t| t.name == name && !t.state.is_terminal())
            .map(|t| t.id)
            .ok_or(SimError::UnknownTask)?;
        self.sim().cancel(target)?;
        println!("--> Cancelled `{}`.", name);
        Ok(())
    }

    fn list_signals(&self) {
        for (_, signal) in self.bench.sim.signals() {
            println!(
                "  {:<8} {:<10} {:>6}  v{}",
                signal.name().cyan(),
                signal.kind().label(),
                signal.render(),
                signal.version()
            );
        }
    }

    fn list_tasks(&self) {
        for task in self.bench.sim.tasks() {
            println!(
                "  {:<14} {:<10} {:>4} resumes  {}",
                task.name.cyan(),
                task.state,
                task.resumptions,
                task.waiting_on.unwrap_or_default().dimmed()
            );
        }
    }

    fn show_time(&self) {
        let sim = &self.bench.sim;
        println!(
            "  {} ({} ns) in the {} phase",
            sim.now(),
            sim.time_in(TimeUnit::Ns),
            sim.phase()
        );
        match sim.peek_next() {
            Some((time, phase)) => println!("  next resumption at {} {}", time, phase),
            None => println!("  no resumption queued"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    let config_path = env::args().nth(1).map(PathBuf::from);
    let config = SimConfig::load(config_path.as_deref())?;

    // Create the shared flag for the event listener.
    let is_tracing = Arc::new(AtomicBool::new(false));
    let mut session = Session::new(config.clone(), is_tracing.clone())?;
    info!("Built the flip-flop bench on {}", ENGINE_NAME);

    let mut rl = Editor::new()?;
    let helper = MyHighlighter {};
    rl.set_helper(Some(helper));

    println!("{} is ready. Type 'help' for commands or 'exit' to quit.", ENGINE_NAME.cyan());

    loop {
        let prompt = format!("{}", ">> ".cyan().bold());
        let readline = rl.readline(&prompt);
        match readline {
            Ok(line) => {
                rl.add_history_entry(line.as_str())?;
                let args = line.split_whitespace().collect::<Vec<_>>();

                let result = match args.as_slice() {
                    ["demo"] => session.demo(),
                    ["run"] => session.run(),
                    ["step"] => session.step(),
                    ["advance", ticks] => match ticks.parse::<u64>() {
                        Ok(ticks) => session.sim().advance(ticks).map(|r| session.report(&r)),
                        Err(_) => {
                            println!("Error: '{}' is not a number of ticks.", ticks);
                            Ok(())
                        }
                    },
                    ["next"] | ["time"] => {
                        session.show_time();
                        Ok(())
                    }
                    ["peek", name] => session.peek(name),
                    ["poke", name, value] => match value.parse::<u64>() {
                        Ok(n) => session.poke(name, n),
                        Err(_) => {
                            println!("Error: '{}' is not a number.", value);
                            Ok(())
                        }
                    },
                    ["signals"] => {
                        session.list_signals();
                        Ok(())
                    }
                    ["tasks"] => {
                        session.list_tasks();
                        Ok(())
                    }
                    ["cancel", name] => session.cancel(name),
                    ["log"] => {
                        for observation in session.bench.sim.observations() {
                            print_observation(observation);
                        }
                        Ok(())
                    }
                    ["trace", "on"] => {
                        is_tracing.store(true, Ordering::Relaxed);
                        println!("--> Started printing the event stream.");
                        Ok(())
                    }
                    ["trace", "off"] => {
                        is_tracing.store(false, Ordering::Relaxed);
                        println!("--> Stopped printing the event stream.");
                        Ok(())
                    }
                    ["reset"] => {
                        session.sim().shutdown();
                        session = Session::new(config.clone(), is_tracing.clone())?;
                        println!("--> Rebuilt the bench at {}.", SimTime::ZERO);
                        Ok(())
                    }
                    ["help"] => {
                        print_help();
                        Ok(())
                    }
                    ["exit"] => break,
                    [] => Ok(()),
                    _ => {
                        println!("Unknown command: '{}'. Type 'help'.", line.trim());
                        Ok(())
                    }
                };

                session.flush_observations();
                if let Err(e) = result {
                    println!("{} {}", format!("[{}]", e.as_label()).red(), e);
                }
            }
            Err(_) => {
                println!("Exiting deltashell...");
                break;
            }
        }
    }

    session.sim().shutdown();
    Ok(())
}
