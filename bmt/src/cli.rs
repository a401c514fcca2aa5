use std::path::PathBuf;

use anyhow::{Context, Result};
use argh::FromArgs;

use crate::config::Config;
use crate::emitter::ScribeConnector;
use crate::ramp::Controller;
use crate::shutdown::{self, StopFlag};
use crate::{observability, report};

/// Ramping load generator for Scribe log collectors.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Version(VersionCommand),
}

/// ramp up workers against the collector until SIGTERM or SIGINT
///
/// One more batch of workers is started every ramp interval until the given number of workers is
/// running. On SIGTERM or SIGINT, all workers are stopped and a summary is printed.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {
    /// number of workers to ramp up to
    #[argh(positional)]
    workers: usize,
}

/// print the version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    let workers = match args.command {
        Command::Version(VersionCommand {}) => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Command::Run(RunCommand { workers }) => workers,
    };

    let config = Config::load(args.config.as_deref()).context("failed to load configuration")?;

    // Sentry should be initialized before creating the async runtime.
    let _sentry_guard = observability::init_sentry(&config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("bmt-rt")
        .enable_all()
        .worker_threads(config.runtime.worker_threads.max(1))
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);

    runtime.block_on(run(config, workers))
}

async fn run(config: Config, workers: usize) -> Result<()> {
    let stop = StopFlag::new();
    shutdown::listen_for_signals(stop.clone()).context("failed to install signal handlers")?;

    let connector = ScribeConnector::new(&config.collector);
    let controller = Controller::new(workers, config.ramp, config.emitter, connector, stop)
        .context("failed to initialize worker pool")?;

    tracing::info!(collector = %config.collector.addr(), "starting load");
    let report = controller.run().await;

    report::print_summary(&report);
    tracing::info!("shutdown complete");

    Ok(())
}
