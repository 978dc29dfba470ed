//! In-memory slaveapi for processor and supervisor tests.
//!
//! Issued actions are appended to the slave's history as pending, the way
//! the real service records a fresh request.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use jiff::Timestamp;

use crate::model::{
    ActionHistory, ActionKind, ActionRequest, ActionResult, ActionState, Job, SlaveRecord,
};

use super::{ApiError, Result, SlaveApi};

#[derive(Debug, Default, Clone)]
struct FakeSlave {
    job_ends: Vec<Timestamp>,
    gracefuls: ActionHistory,
    reboots: ActionHistory,
}

#[derive(Default)]
pub struct FakeSlaveApi {
    slaves: Mutex<BTreeMap<String, FakeSlave>>,
    issued: Mutex<Vec<(String, ActionRequest)>>,
    broken: Mutex<BTreeSet<String>>,
    now: Option<Timestamp>,
    fetch_delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
    next_request: AtomicUsize,
}

impl FakeSlaveApi {
    /// A fake whose issued actions are stamped with `now`.
    pub fn at(now: Timestamp) -> Self {
        Self {
            now: Some(now),
            ..Self::default()
        }
    }

    /// Every `fetch_slave` call takes this long.
    #[must_use]
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    /// Registers a slave whose jobs ended at the given times, newest first.
    pub fn add_slave(&self, name: &str, job_ends: &[Timestamp]) {
        self.lock_slaves().insert(
            name.to_string(),
            FakeSlave {
                job_ends: job_ends.to_vec(),
                ..FakeSlave::default()
            },
        );
    }

    pub fn record_action(&self, name: &str, result: ActionResult) {
        let mut slaves = self.lock_slaves();
        let slave = slaves.entry(name.to_string()).or_default();
        match result.kind {
            ActionKind::GracefulShutdown => slave.gracefuls.push(result),
            ActionKind::Reboot => slave.reboots.push(result),
        }
    }

    /// Makes every call about `name` fail as if slaveapi were down.
    pub fn break_slave(&self, name: &str) {
        self.broken.lock().unwrap().insert(name.to_string());
    }

    pub fn issued(&self) -> Vec<(String, ActionRequest)> {
        self.issued.lock().unwrap().clone()
    }

    /// The most `fetch_slave` calls that were ever running at once.
    pub fn max_concurrent_fetches(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn lock_slaves(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, FakeSlave>> {
        self.slaves.lock().unwrap()
    }

    fn check(&self, name: &str) -> Result<FakeSlave> {
        let url = format!("fake://slaves/{name}");
        if self.broken.lock().unwrap().contains(name) {
            return Err(ApiError::Status { url, status: 503 });
        }
        self.lock_slaves()
            .get(name)
            .cloned()
            .ok_or(ApiError::Status { url, status: 404 })
    }
}

impl SlaveApi for FakeSlaveApi {
    fn list_production_slaves(&self) -> Result<Vec<String>> {
        Ok(self.lock_slaves().keys().cloned().collect())
    }

    fn fetch_slave(&self, name: &str) -> Result<SlaveRecord> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        if !self.fetch_delay.is_zero() {
            thread::sleep(self.fetch_delay);
        }
        let slave = self.check(name);
        self.active.fetch_sub(1, Ordering::SeqCst);

        Ok(SlaveRecord {
            name: name.to_string(),
            recent_jobs: slave?
                .job_ends
                .into_iter()
                .map(|ended_at| Job { ended_at })
                .collect(),
        })
    }

    fn fetch_action_history(&self, name: &str, kind: ActionKind) -> Result<ActionHistory> {
        let slave = self.check(name)?;
        Ok(match kind {
            ActionKind::GracefulShutdown => slave.gracefuls,
            ActionKind::Reboot => slave.reboots,
        })
    }

    fn issue_action(&self, name: &str, request: ActionRequest) -> Result<ActionResult> {
        self.check(name)?;
        self.issued
            .lock()
            .unwrap()
            .push((name.to_string(), request));
        let id = self.next_request.fetch_add(1, Ordering::SeqCst);
        let requested_at = self.now.unwrap_or_else(Timestamp::now);
        let result = ActionResult::new(
            request.kind(),
            ActionState::Pending,
            Some(requested_at),
            None,
            None,
        )
        .map(|r| r.with_request_id(id.to_string()))
        .ok_or(ApiError::Protocol {
            url: format!("fake://slaves/{name}"),
            reason: "no timestamp".to_string(),
        })?;
        self.record_action(name, result.clone());
        Ok(result)
    }
}
