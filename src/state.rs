//! State extraction: reduce a slave record and its action histories
//! to the handful of facts the policy cares about.
//!
//! Pure and deterministic. Never fails, never performs I/O.

use jiff::Timestamp;

use crate::model::{ActionHistory, ActionResult, SlaveRecord};

/// The derived, per-pass view of a slave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveState {
    pub last_job_end: Option<Timestamp>,
    pub most_recent_graceful: Option<ActionResult>,
    pub most_recent_reboot: Option<ActionResult>,

    /// The later of the last job end and the most recent reboot.
    pub idle_since: Option<Timestamp>,
}

/// Extract the state of a slave from its record and both action histories.
pub fn extract(
    record: &SlaveRecord,
    gracefuls: &ActionHistory,
    reboots: &ActionHistory,
) -> SlaveState {
    let last_job_end = record.last_job_end();
    let most_recent_graceful = gracefuls.most_recent().cloned();
    let most_recent_reboot = reboots.most_recent().cloned();

    let last_reboot = most_recent_reboot
        .as_ref()
        .map(ActionResult::latest_timestamp);
    let idle_since = match (last_job_end, last_reboot) {
        (Some(job), Some(reboot)) => Some(job.max(reboot)),
        (job, reboot) => job.or(reboot),
    };

    SlaveState {
        last_job_end,
        most_recent_graceful,
        most_recent_reboot,
        idle_since,
    }
}
