//! lockstep - replay one recording on several engine builds and compare
//! their observations tick by tick.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use lk_compare::{
    CancelToken, InterruptAction, Interrupter, LockstepDriver, LoopConfig, run_comparison,
};
use lk_engine::{
    InterfaceOptions, ReplayStore, RequestStartReplay, SubprocessLauncher, VersionSpec,
    replay_version,
};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "lockstep")]
#[command(about = "Compare observations of engine builds replaying the same recording")]
struct Args {
    /// Engine binaries to compare; the first one is the reference.
    /// Their version must match the replay.
    #[arg(required = true, value_name = "BINARIES")]
    binaries: Vec<String>,

    /// Diff the observations
    #[arg(long)]
    diff: bool,

    /// Truncate printed diff values to this many characters (0 = no limit)
    #[arg(long, default_value = "0")]
    truncate: usize,

    /// Game loops per observation
    #[arg(long, default_value = "8")]
    step_mul: u32,

    /// Maximum number of observations
    #[arg(long, default_value = "100000")]
    count: u64,

    /// Replay name or path
    #[arg(long)]
    replay: String,

    /// Player whose perspective is observed
    #[arg(long, default_value = "1")]
    observed_player: u32,

    /// Rows shown in the observation path table
    #[arg(long, default_value = "100")]
    top_paths: usize,

    /// Directory holding engine binaries
    #[arg(long, env = "LOCKSTEP_ENGINE_DIR")]
    engine_dir: Option<PathBuf>,

    /// Extra argument passed to every engine ahead of the version flags
    #[arg(long = "engine-arg", value_name = "ARG", allow_hyphen_values = true)]
    engine_args: Vec<String>,

    /// Directory holding replays
    #[arg(long, env = "LOCKSTEP_REPLAY_DIR")]
    replay_dir: Option<PathBuf>,

    /// Print the final report as JSON
    #[arg(long)]
    json: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    let launcher =
        SubprocessLauncher::new(args.engine_dir.clone()).with_leading_args(args.engine_args.clone());
    let cancel = CancelToken::new();
    let interrupter = Interrupter::new(cancel.clone(), launcher.registry());
    ctrlc::set_handler(move || {
        if interrupter.interrupt() == InterruptAction::Exit {
            std::process::exit(130);
        }
    })
    .context("failed to install Ctrl-C handler")?;

    let replay_data = ReplayStore::new(args.replay_dir.clone())
        .replay_data(&args.replay)
        .with_context(|| format!("failed to load replay {}", args.replay))?;
    let version = replay_version(&replay_data).context("failed to read replay version")?;
    let versions = VersionSpec::for_binaries(&version, &args.binaries);
    info!(
        replay = %args.replay,
        build = version.build,
        binaries = versions.len(),
        "starting comparison"
    );

    let start = RequestStartReplay {
        replay_data,
        options: InterfaceOptions::comparison(),
        observed_player_id: args.observed_player,
    };
    let driver = LockstepDriver::new(
        LoopConfig {
            diff: args.diff,
            truncate: args.truncate,
            step_mul: args.step_mul,
            count: args.count,
        },
        cancel,
    );

    // Keep stdout parseable when the report is JSON.
    let mut progress: Box<dyn Write> = if args.json {
        Box::new(io::stderr())
    } else {
        Box::new(io::stdout())
    };
    let report = run_comparison(
        launcher,
        &versions,
        &start,
        &driver,
        args.top_paths,
        &mut progress,
    )?;
    progress.flush()?;

    info!(
        termination = %report.outcome.termination,
        iterations = report.outcome.iterations,
        "comparison finished"
    );
    if args.json {
        println!("{}", report.to_json());
    } else {
        print!("{}", report);
    }
    Ok(())
}
