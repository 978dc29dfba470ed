//! The processor pool supervisor: one pass over the work queue.
//!
//! ```text
//!   start ──► Filling ──(queue empty, or wait budget spent, or interrupt)──► Draining
//!                ▲                                                            │
//!                └──────────(re-enqueued slaves, still filling allowed)───────┤
//!                                                                             ▼
//!                                                          Stopped ◄──(no active threads)
//! ```
//!
//! While filling, a processor thread is spawned whenever fewer than
//! `min(max_processors, queue length)` are active. Otherwise the supervisor
//! waits for one to finish, backing off from `starting_wait` up to
//! `max_wait_interval`. If it has been waiting for a free slot for longer than
//! `worker_wait_threshold`, filling is abandoned and the pass drains.

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::backoff::ExponentialBackoff;
use crate::interrupt::Interrupt;
use crate::processor::{ProcessingOutcome, Processor};
use crate::queue::{QueueItem, WorkQueue};

/// Upper bound on concurrent processor threads.
pub const MAX_PROCESSORS: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    pub max_processors: usize,
    pub starting_wait: Duration,
    pub max_wait_interval: Duration,
    pub worker_wait_threshold: Duration,

    /// How often to check on threads while draining.
    pub drain_poll: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            max_processors: MAX_PROCESSORS,
            starting_wait: Duration::from_secs(1),
            max_wait_interval: Duration::from_secs(120),
            worker_wait_threshold: Duration::from_secs(30 * 60),
            drain_poll: Duration::from_secs(1),
        }
    }
}

/// What happened during one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Processing attempts, counting re-enqueued slaves once per attempt.
    pub processed: usize,
    pub skipped: usize,
    pub acted: usize,
    pub rehearsed: usize,
    pub failed: usize,

    /// Slaves still queued when the pass ended.
    pub residual: Vec<String>,

    /// Filling stopped because no slot freed up within the wait budget.
    pub aborted: bool,
}

impl PassReport {
    fn record(&mut self, outcome: &ProcessingOutcome) {
        self.processed += 1;
        match outcome {
            ProcessingOutcome::Skipped(_) => self.skipped += 1,
            ProcessingOutcome::Acted(_) => self.acted += 1,
            ProcessingOutcome::Rehearsed(_) => self.rehearsed += 1,
            ProcessingOutcome::Failed(_) => self.failed += 1,
        }
    }
}

impl fmt::Display for PassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processed, {} left unprocessed",
            self.processed,
            self.residual.len()
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The operator interrupted the pass. Active processors were allowed to finish.
    #[error("interrupted by operator")]
    Interrupted(PassReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Filling,
    Draining,
}

struct ActiveProcessor {
    seq: u64,
    name: String,
    handle: JoinHandle<ProcessingOutcome>,
}

pub struct Supervisor {
    processor: Arc<Processor>,
    queue: Arc<WorkQueue>,
    settings: SupervisorSettings,
    interrupt: Interrupt,
}

impl Supervisor {
    pub fn new(
        processor: Arc<Processor>,
        queue: Arc<WorkQueue>,
        mut settings: SupervisorSettings,
        interrupt: Interrupt,
    ) -> Self {
        settings.max_processors = settings.max_processors.clamp(1, MAX_PROCESSORS);
        Self {
            processor,
            queue,
            settings,
            interrupt,
        }
    }

    /// Run one pass to completion.
    ///
    /// Returns only once no processor thread is active.
    pub fn run(&self) -> Result<PassReport, SupervisorError> {
        let (done_tx, done_rx) = mpsc::channel();
        let mut active = Vec::new();
        let mut report = PassReport::default();
        let mut backoff =
            ExponentialBackoff::new(self.settings.starting_wait, self.settings.max_wait_interval);
        let mut waiting_since: Option<Instant> = None;
        let mut phase = Phase::Filling;

        info!(
            queued = self.queue.len(),
            max_processors = self.settings.max_processors,
            "starting pass"
        );

        loop {
            self.reap(&done_rx, &mut active, &mut report);
            let interrupted = self.interrupt.is_raised();
            let may_fill = !interrupted && !report.aborted;

            match phase {
                Phase::Filling => {
                    let queued = self.queue.len();
                    if !may_fill || queued == 0 {
                        phase = Phase::Draining;
                        continue;
                    }

                    let limit = self.settings.max_processors.min(queued);
                    if active.len() < limit
                        && let Some(item) = self.queue.try_get()
                    {
                        match self.spawn(item, &done_tx) {
                            Ok(processor) => {
                                active.push(processor);
                                backoff.reset();
                                waiting_since = None;
                                continue;
                            }
                            Err((item, e)) => {
                                error!(slave = %item.name, error = %e, "failed to spawn processor");
                                self.queue.put_back(item);
                            }
                        }
                    }

                    let started = *waiting_since.get_or_insert_with(Instant::now);
                    if started.elapsed() >= self.settings.worker_wait_threshold {
                        warn!(
                            waited_secs = started.elapsed().as_secs(),
                            active = active.len(),
                            queued,
                            "no processor slot freed up in time; abandoning the rest of the queue"
                        );
                        report.aborted = true;
                        phase = Phase::Draining;
                        continue;
                    }

                    let delay = backoff.next().unwrap_or(self.settings.max_wait_interval);
                    debug!(
                        active = active.len(),
                        queued,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "waiting for a free processor slot"
                    );
                    self.wait(&done_rx, delay, &mut active, &mut report);
                }
                Phase::Draining => {
                    if may_fill && !self.queue.is_empty() {
                        // Slaves re-enqueued after a graceful belong to this pass.
                        phase = Phase::Filling;
                        waiting_since = None;
                        continue;
                    }
                    if active.is_empty() {
                        break;
                    }
                    self.wait(&done_rx, self.settings.drain_poll, &mut active, &mut report);
                }
            }
        }

        report.residual = self.queue.pending_names();
        info!(
            processed = report.processed,
            skipped = report.skipped,
            acted = report.acted,
            rehearsed = report.rehearsed,
            failed = report.failed,
            residual = report.residual.len(),
            "pass finished"
        );

        if self.interrupt.is_raised() {
            return Err(SupervisorError::Interrupted(report));
        }
        Ok(report)
    }

    fn spawn(
        &self,
        item: QueueItem,
        done: &Sender<u64>,
    ) -> Result<ActiveProcessor, (QueueItem, std::io::Error)> {
        let processor = Arc::clone(&self.processor);
        let done = done.clone();
        let seq = item.seq;
        let name = item.name.clone();
        let job = item.clone();

        let spawned = thread::Builder::new()
            .name(format!("processor-{seq}"))
            .spawn(move || {
                let outcome = processor.process(&job);
                // The supervisor may already be gone during shutdown.
                let _ = done.send(seq);
                outcome
            });

        match spawned {
            Ok(handle) => {
                debug!(slave = %name, seq, "spawned processor");
                Ok(ActiveProcessor { seq, name, handle })
            }
            Err(e) => Err((item, e)),
        }
    }

    /// Block until a processor finishes or `timeout` passes.
    fn wait(
        &self,
        done: &Receiver<u64>,
        timeout: Duration,
        active: &mut Vec<ActiveProcessor>,
        report: &mut PassReport,
    ) {
        match done.recv_timeout(timeout) {
            Ok(seq) => self.join(seq, active, report),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {}
        }
    }

    /// Join every processor that has finished.
    fn reap(&self, done: &Receiver<u64>, active: &mut Vec<ActiveProcessor>, report: &mut PassReport) {
        while let Ok(seq) = done.try_recv() {
            self.join(seq, active, report);
        }
        // Threads that ended without reporting in.
        let mut i = 0;
        while i < active.len() {
            if active[i].handle.is_finished() {
                let seq = active[i].seq;
                self.join(seq, active, report);
            } else {
                i += 1;
            }
        }
    }

    #[allow(clippy::unused_self)]
    fn join(&self, seq: u64, active: &mut Vec<ActiveProcessor>, report: &mut PassReport) {
        let Some(index) = active.iter().position(|p| p.seq == seq) else {
            return;
        };
        let finished = active.swap_remove(index);
        match finished.handle.join() {
            Ok(outcome) => {
                debug!(slave = %finished.name, seq, %outcome, "processor finished");
                report.record(&outcome);
            }
            Err(_) => {
                error!(slave = %finished.name, seq, "processor thread died");
                report.processed += 1;
                report.failed += 1;
            }
        }
    }
}
