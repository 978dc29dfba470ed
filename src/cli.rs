//! Command line entry point: load the config, queue the fleet, run one pass.
//!
//! ```text
//! reboot-idle-slaves [--dryrun] [--verbose] [--log-format text|json] <config-file>
//! ```

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::util::TryInitError;

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, ConfigError};
use crate::exclude::Exclusions;
use crate::interrupt::{self, EXIT_INTERRUPTED};
use crate::logging::{self, LogFormat};
use crate::processor::Processor;
use crate::queue::WorkQueue;
use crate::slaveapi::{ApiError, HttpSlaveApi, SlaveApi};
use crate::supervisor::{PassReport, Supervisor, SupervisorError};

/// Gracefully shut down, then reboot, build slaves that have sat idle too long.
#[derive(Debug, Parser)]
#[command(name = "reboot-idle-slaves")]
pub struct Cli {
    /// Path to the configuration file.
    pub config: PathBuf,

    /// Decide and log what would be done, but issue no actions.
    #[arg(long)]
    pub dryrun: bool,

    /// Log at debug level regardless of the config file.
    #[arg(short, long)]
    pub verbose: bool,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Errors that end the run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to set up logging: {0}")]
    Logging(#[from] TryInitError),

    #[error("failed to listen for interrupts: {0}")]
    Signal(#[from] io::Error),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("interrupted by operator ({0})")]
    Interrupted(PassReport),
}

impl RunError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Interrupted(_) => EXIT_INTERRUPTED,
            _ => 1,
        }
    }
}

/// Run one pass over the production fleet.
pub fn run(cli: &Cli) -> Result<PassReport, RunError> {
    let config = Config::load(&cli.config)?;
    logging::init(cli.verbose || config.verbose, cli.log_format)?;
    info!(
        config = %cli.config.display(),
        slaveapi = %config.slaveapi_server,
        dry_run = cli.dryrun,
        "starting"
    );

    let interrupt = interrupt::install()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let api: Arc<dyn SlaveApi> = Arc::new(HttpSlaveApi::new(
        config.slaveapi_server.clone(),
        config.request_timeout,
        config.retry_policy(),
        Arc::clone(&clock),
    )?);
    let queue = Arc::new(WorkQueue::new());

    let queued = enqueue_production_slaves(api.as_ref(), &config.exclusions, &queue)?;
    info!(queued, excluded_patterns = config.exclusions.len(), "queued production slaves");

    let processor = Processor::new(
        Arc::clone(&api),
        Arc::clone(&queue),
        clock,
        config.processor_settings(cli.dryrun),
    );
    let supervisor = Supervisor::new(
        Arc::new(processor),
        Arc::clone(&queue),
        config.supervisor_settings(),
        interrupt,
    );

    match supervisor.run() {
        Ok(report) => {
            warn_residual(&report);
            Ok(report)
        }
        Err(SupervisorError::Interrupted(report)) => {
            warn_residual(&report);
            Err(RunError::Interrupted(report))
        }
    }
}

fn warn_residual(report: &PassReport) {
    if !report.residual.is_empty() {
        warn!(residual = ?report.residual, "slaves left unprocessed");
    }
}

/// Queue every production slave that no exclusion pattern matches.
///
/// Returns how many were queued.
pub fn enqueue_production_slaves(
    api: &dyn SlaveApi,
    exclusions: &Exclusions,
    queue: &WorkQueue,
) -> Result<usize, ApiError> {
    let mut queued = 0;
    for name in api.list_production_slaves()? {
        if exclusions.is_excluded(&name) {
            info!(slave = %name, "excluded");
            continue;
        }
        queue.put(name);
        queued += 1;
    }
    Ok(queued)
}
