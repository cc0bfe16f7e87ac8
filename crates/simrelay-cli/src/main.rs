//! simrelay CLI - The `simrelay` command.
//!
//! Drives a relay script with a stand-in event source: the start callback,
//! a run of timer events plus optional value-change stimulus, then the
//! finish callback. This is the same call sequence a simulator makes.

mod stimulus;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use simrelay_core::{CallbackData, Reason, RelayConfig, Variant};

/// simrelay - lock-step script relay for simulators
#[derive(Parser, Debug)]
#[command(name = "simrelay")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a script in lock-step with a simulated event loop", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a relay script against timer events and optional stimulus
    Run {
        /// Configuration file (defaults to the user config location)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Override the hosting variant (direct or threaded)
        #[arg(long, value_parser = parse_variant)]
        variant: Option<Variant>,

        /// Number of timer events to deliver
        #[arg(short = 'n', long, default_value_t = 10)]
        events: u64,

        /// Simulation time between timer events
        #[arg(long, default_value_t = 10)]
        step: u64,

        /// Value changes to deliver, one `time object value` per line
        #[arg(long, value_name = "FILE")]
        stimulus: Option<PathBuf>,

        /// Interpreter arguments, e.g. `-e CODE` or `script.rhai ARGS...`
        #[arg(
            trailing_var_arg = true,
            allow_hyphen_values = true,
            value_name = "ARGS"
        )]
        args: Vec<String>,
    },

    /// Show version information
    Version,
}

fn parse_variant(value: &str) -> std::result::Result<Variant, String> {
    match value {
        "direct" => Ok(Variant::Direct),
        "threaded" => Ok(Variant::Threaded),
        other => Err(format!(
            "unknown variant {:?} (expected direct or threaded)",
            other
        )),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match args.command {
        Commands::Run {
            config,
            variant,
            events,
            step,
            stimulus,
            args,
        } => run_relay(config, variant, events, step, stimulus, args),
        Commands::Version => {
            println!("simrelay {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Lock-step relay between a simulator event loop and a script interpreter");
            println!();
            println!("Variants:");
            println!("  - threaded: interpreter on its own thread, scripts may yield anywhere");
            println!("  - direct:   interpreter on the host thread, yielding is a no-op");
            Ok(())
        }
    }
}

/// Protocol violations abort; everything else is returned.
fn check(result: simrelay_core::Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_protocol_violation() => {
            log::error!("{}", e);
            std::process::abort();
        }
        other => other.map_err(anyhow::Error::from),
    }
}

fn run_relay(
    config_path: Option<PathBuf>,
    variant: Option<Variant>,
    events: u64,
    step: u64,
    stimulus_path: Option<PathBuf>,
    args: Vec<String>,
) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => RelayConfig::load_from(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => RelayConfig::load_or_default(),
    };
    if let Some(variant) = variant {
        config.variant = variant;
    }

    let stimuli = match &stimulus_path {
        Some(path) => stimulus::load(path)?,
        None => Vec::new(),
    };
    let schedule = stimulus::schedule(events, step, stimuli)?;
    let end_time = stimulus::end_time(&schedule, step)?;

    log::info!("simrelay {} ({:?} variant)", env!("CARGO_PKG_VERSION"), config.variant);

    let mut relay = simrelay_core::script_relay(config);

    log::info!("1. Starting interpreter...");
    let start = CallbackData::new(Reason::StartOfSimulation, 0);
    check(relay.on_start(Some(&start), Some(&args))).context("Failed to start interpreter")?;

    log::info!("2. Delivering {} events...", schedule.len());
    for event in &schedule {
        check(relay.on_resume(Some(&event.callback())))
            .with_context(|| format!("Failed to deliver event at time {}", event.time()))?;
    }

    log::info!("3. Finishing at time {}...", end_time);
    let end = CallbackData::new(Reason::EndOfSimulation, end_time);
    check(relay.on_finish(Some(&end))).context("Failed to finish interpreter")?;

    if let Some(stats) = relay.channel_stats() {
        log::debug!(
            "rendezvous: {} round trips, balanced: {}",
            stats.round_trips(),
            stats.is_balanced()
        );
    }
    log::info!("   ✓ Done after {} events", relay.resumes());
    Ok(())
}
