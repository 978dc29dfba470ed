//! Slave records: the snapshot slaveapi returns for a single slave.

use jiff::Timestamp;

/// A slave as seen by slaveapi at the moment it was fetched.
///
/// Read-only; discarded after one processing pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveRecord {
    pub name: String,

    /// Completed jobs, newest first.
    pub recent_jobs: Vec<Job>,
}

/// A completed build job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    pub ended_at: Timestamp,
}

impl SlaveRecord {
    /// When the newest job finished, if the slave has run anything at all.
    pub fn last_job_end(&self) -> Option<Timestamp> {
        self.recent_jobs.first().map(|job| job.ended_at)
    }
}
