//! Per-slave processing: pull, extract, decide, act.
//!
//! A processor runs on its own thread for one queue item. Whatever happens
//! (slaveapi errors, malformed responses, panics) is turned into a
//! [`ProcessingOutcome`]; nothing escapes to the supervisor.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use jiff::{SignedDuration, Timestamp};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::model::{ActionKind, ActionRequest, Decision, Escalation, SkipReason};
use crate::policy::{self, DEFAULT_IDLE_THRESHOLD};
use crate::queue::{QueueItem, WorkQueue};
use crate::slaveapi::{ApiError, SlaveApi};
use crate::state::{self, SlaveState};

/// Errors that end processing of one slave.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// How one processing attempt ended.
#[derive(Debug)]
pub enum ProcessingOutcome {
    Skipped(SkipReason),
    Acted(ActionKind),
    /// Dry run: the action was decided on but not issued.
    Rehearsed(ActionKind),
    Failed(ProcessError),
}

impl fmt::Display for ProcessingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped(reason) => write!(f, "skipped ({reason})"),
            Self::Acted(kind) => write!(f, "issued {kind}"),
            Self::Rehearsed(kind) => write!(f, "would have issued {kind}"),
            Self::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// Knobs for the per-slave pipeline.
#[derive(Debug, Clone, Copy)]
pub struct ProcessorSettings {
    pub idle_threshold: SignedDuration,

    /// Passed to slaveapi as the graceful wait, and slept before re-enqueueing.
    pub graceful_wait: Duration,

    pub dry_run: bool,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
            graceful_wait: Duration::from_secs(ActionRequest::DEFAULT_GRACEFUL_WAIT_SECONDS),
            dry_run: false,
        }
    }
}

type SleepFn = Box<dyn Fn(Duration) + Send + Sync>;

/// Drives single slaves through the pipeline. Shared by all processor threads.
pub struct Processor {
    api: Arc<dyn SlaveApi>,
    queue: Arc<WorkQueue>,
    clock: Arc<dyn Clock>,
    settings: ProcessorSettings,
    sleep_fn: SleepFn,
}

impl Processor {
    pub fn new(
        api: Arc<dyn SlaveApi>,
        queue: Arc<WorkQueue>,
        clock: Arc<dyn Clock>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            api,
            queue,
            clock,
            settings,
            sleep_fn: Box::new(thread::sleep),
        }
    }

    /// Replaces the sleep used while a graceful resolves.
    #[cfg(test)]
    #[must_use]
    pub fn with_sleep(mut self, sleep_fn: SleepFn) -> Self {
        self.sleep_fn = sleep_fn;
        self
    }

    /// Process one queue item. Never panics, never returns an error.
    pub fn process(&self, item: &QueueItem) -> ProcessingOutcome {
        let name = item.name.as_str();
        match panic::catch_unwind(AssertUnwindSafe(|| self.try_process(item))) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                match &e {
                    ProcessError::Api(api) if api.is_protocol() => {
                        warn!(slave = name, seq = item.seq, error = %e, "slaveapi misbehaved");
                    }
                    _ => error!(slave = name, seq = item.seq, error = %e, "processing failed"),
                }
                ProcessingOutcome::Failed(e)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    slave = name,
                    seq = item.seq,
                    panic = %message,
                    backtrace = %std::backtrace::Backtrace::force_capture(),
                    "processor panicked"
                );
                ProcessingOutcome::Failed(ProcessError::Internal(message))
            }
        }
    }

    fn try_process(&self, item: &QueueItem) -> Result<ProcessingOutcome, ProcessError> {
        let name = item.name.as_str();
        let record = self.api.fetch_slave(name)?;
        let gracefuls = self
            .api
            .fetch_action_history(name, ActionKind::GracefulShutdown)?;
        let reboots = self.api.fetch_action_history(name, ActionKind::Reboot)?;
        debug!(
            slave = %record.name,
            jobs = record.recent_jobs.len(),
            gracefuls = gracefuls.len(),
            reboots = reboots.len(),
            "fetched slave"
        );

        let state = state::extract(&record, &gracefuls, &reboots);
        let now = self.clock.now();
        log_state(name, &state, now);

        match policy::decide(&state, now, self.settings.idle_threshold) {
            Decision::Skip(reason) => {
                info!(slave = name, seq = item.seq, %reason, "skipping");
                Ok(ProcessingOutcome::Skipped(reason))
            }
            Decision::IssueGraceful => self.graceful(item),
            Decision::IssueReboot(escalation) => self.reboot(item, escalation),
        }
    }

    fn graceful(&self, item: &QueueItem) -> Result<ProcessingOutcome, ProcessError> {
        let name = item.name.as_str();
        let dry_run = self.settings.dry_run;
        info!(slave = name, seq = item.seq, dry_run, "issuing graceful shutdown");
        if dry_run {
            return Ok(ProcessingOutcome::Rehearsed(ActionKind::GracefulShutdown));
        }

        let request = ActionRequest::GracefulShutdown {
            wait_seconds: self.settings.graceful_wait.as_secs(),
        };
        let result = self.api.issue_action(name, request)?;
        debug!(slave = name, request_id = ?result.request_id, "graceful shutdown requested");

        // Let the graceful resolve, then look again so the next pass can reboot.
        (self.sleep_fn)(self.settings.graceful_wait);
        let seq = self.queue.put(name);
        debug!(slave = name, seq, "re-enqueued after graceful shutdown");

        Ok(ProcessingOutcome::Acted(ActionKind::GracefulShutdown))
    }

    fn reboot(
        &self,
        item: &QueueItem,
        escalation: Escalation,
    ) -> Result<ProcessingOutcome, ProcessError> {
        let name = item.name.as_str();
        let dry_run = self.settings.dry_run;
        info!(slave = name, seq = item.seq, dry_run, note = %escalation, "issuing reboot");
        if dry_run {
            return Ok(ProcessingOutcome::Rehearsed(ActionKind::Reboot));
        }

        // slaveapi owns the reboot from here, including escalation to humans.
        let result = self.api.issue_action(name, ActionRequest::Reboot)?;
        debug!(slave = name, request_id = ?result.request_id, "reboot requested");

        Ok(ProcessingOutcome::Acted(ActionKind::Reboot))
    }
}

fn log_state(name: &str, state: &SlaveState, now: Timestamp) {
    if let Some(end) = state.last_job_end {
        let idle_for = format!("{:#}", now.duration_since(end));
        debug!(slave = name, last_job_end = %end, %idle_for, "last job");
    }
    for action in [&state.most_recent_graceful, &state.most_recent_reboot]
        .into_iter()
        .flatten()
    {
        debug!(
            slave = name,
            action = %action.kind,
            state = %action.state,
            at = %action.latest_timestamp(),
            "most recent action"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
