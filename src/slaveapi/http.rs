//! slaveapi over HTTP/JSON.
//!
//! Endpoints used:
//!
//! ```text
//! GET  /slaves?environment=prod&enabled=1      -> {"slaves": [{"name": ...}, ...]}
//! GET  /slaves/<name>                          -> {"recent_jobs": [{"endtime": ...}, ...]}
//! GET  /slaves/<name>/actions/<action>         -> {<requestid>: {"state": 0..3, ...}}
//! POST /slaves/<name>/actions/shutdown_buildslave?waittime=<secs>
//! POST /slaves/<name>/actions/reboot           -> {"requestid": ...}
//! ```
//!
//! Action states travel as integers; they become [`ActionState`] here and
//! nowhere else.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use jiff::Timestamp;
use reqwest::blocking::Client;
use reqwest::{Method, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::clock::Clock;
use crate::model::{
    ActionHistory, ActionKind, ActionRequest, ActionResult, ActionState, Job, SlaveRecord,
};

use super::retry::{Retrier, RetryPolicy, RetryResult};
use super::{ApiError, Result, SlaveApi};

#[derive(Deserialize)]
struct SlaveList {
    slaves: Vec<SlaveEntry>,
}

#[derive(Deserialize)]
struct SlaveEntry {
    name: String,
}

#[derive(Deserialize)]
struct SlaveInfo {
    recent_jobs: Vec<JobInfo>,
}

#[derive(Deserialize)]
struct JobInfo {
    endtime: f64,
}

#[derive(Deserialize)]
struct ActionEntry {
    state: i64,
    #[serde(default)]
    request_timestamp: Option<f64>,
    #[serde(default)]
    start_timestamp: Option<f64>,
    #[serde(default)]
    finish_timestamp: Option<f64>,
}

#[derive(Deserialize)]
struct ActionResponse {
    requestid: RequestId,
    #[serde(default)]
    state: Option<i64>,
    #[serde(default)]
    request_timestamp: Option<f64>,
    #[serde(default)]
    start_timestamp: Option<f64>,
    #[serde(default)]
    finish_timestamp: Option<f64>,
}

/// slaveapi has handed out both numeric and string request ids.
#[derive(Deserialize)]
#[serde(untagged)]
enum RequestId {
    Number(u64),
    Text(String),
}

impl RequestId {
    fn into_string(self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s,
        }
    }
}

/// Blocking slaveapi client. Cheap to share: the underlying connection pool
/// is reference counted and safe for concurrent use.
pub struct HttpSlaveApi {
    base: Url,
    client: Client,
    retrier: Retrier,
    clock: Arc<dyn Clock>,
}

impl HttpSlaveApi {
    /// Creates a client for the slaveapi server at `base`. Fresh requests
    /// the server has not stamped yet are stamped from `clock`.
    pub fn new(
        base: Url,
        timeout: Duration,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::Client)?;
        Ok(Self {
            base,
            client,
            retrier: Retrier::new(retry),
            clock,
        })
    }

    #[cfg(test)]
    fn with_retrier(base: Url, retrier: Retrier, clock: Arc<dyn Clock>) -> Self {
        Self {
            base,
            client: Client::new(),
            retrier,
            clock,
        }
    }

    /// `base` with `segments` appended to its path.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn call<T: DeserializeOwned>(&self, method: &Method, url: &Url) -> Result<T> {
        debug!(%method, %url, "slaveapi request");
        let body = self.retrier.retry(url.as_str(), || {
            let response = match self.client.request(method.clone(), url.clone()).send() {
                Ok(response) => response,
                Err(e) => return RetryResult::Retry(e),
            };
            let status = response.status();
            if !status.is_success() {
                return RetryResult::Err(ApiError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }
            match response.text() {
                Ok(body) => RetryResult::Ok(body),
                Err(e) => RetryResult::Retry(e),
            }
        })?;
        serde_json::from_str(&body).map_err(|e| protocol(url, e))
    }
}

impl SlaveApi for HttpSlaveApi {
    fn list_production_slaves(&self) -> Result<Vec<String>> {
        let mut url = self.endpoint(&["slaves"]);
        url.query_pairs_mut()
            .append_pair("environment", "prod")
            .append_pair("enabled", "1");
        let list: SlaveList = self.call(&Method::GET, &url)?;
        Ok(list.slaves.into_iter().map(|slave| slave.name).collect())
    }

    fn fetch_slave(&self, name: &str) -> Result<SlaveRecord> {
        let url = self.endpoint(&["slaves", name]);
        let info: SlaveInfo = self.call(&Method::GET, &url)?;
        let recent_jobs = info
            .recent_jobs
            .into_iter()
            .map(|job| {
                Ok(Job {
                    ended_at: timestamp(&url, "endtime", job.endtime)?,
                })
            })
            .collect::<Result<_>>()?;
        Ok(SlaveRecord {
            name: name.to_string(),
            recent_jobs,
        })
    }

    fn fetch_action_history(&self, name: &str, kind: ActionKind) -> Result<ActionHistory> {
        let url = self.endpoint(&["slaves", name, "actions", kind.wire_name()]);
        let body: serde_json::Value = self.call(&Method::GET, &url)?;
        parse_history(&url, kind, body)
    }

    fn issue_action(&self, name: &str, request: ActionRequest) -> Result<ActionResult> {
        let kind = request.kind();
        let mut url = self.endpoint(&["slaves", name, "actions", kind.wire_name()]);
        if let ActionRequest::GracefulShutdown { wait_seconds } = request {
            url.query_pairs_mut()
                .append_pair("waittime", &wait_seconds.to_string());
        }
        let response: ActionResponse = self.call(&Method::POST, &url)?;

        let state = match response.state {
            Some(code) => action_state(&url, code)?,
            None => ActionState::Pending,
        };
        let requested_at = optional_timestamp(&url, "request_timestamp", response.request_timestamp)?;
        let started_at = optional_timestamp(&url, "start_timestamp", response.start_timestamp)?;
        let finished_at = optional_timestamp(&url, "finish_timestamp", response.finish_timestamp)?;

        // A fresh request usually carries no timestamps yet; it was requested now.
        let unstamped = started_at.is_none() && finished_at.is_none();
        let requested_at = requested_at.or_else(|| unstamped.then(|| self.clock.now()));
        ActionResult::new(kind, state, requested_at, started_at, finished_at)
            .map(|result| result.with_request_id(response.requestid.into_string()))
            .ok_or_else(|| protocol(&url, "action response without timestamps"))
    }
}

/// Parse an action history. Accepts the bare `{requestid: entry}` map or
/// one wrapped under the action name.
fn parse_history(url: &Url, kind: ActionKind, body: serde_json::Value) -> Result<ActionHistory> {
    let serde_json::Value::Object(mut top) = body else {
        return Err(protocol(url, "action history is not an object"));
    };
    let entries = match top.remove(kind.wire_name()) {
        Some(serde_json::Value::Object(inner)) => inner,
        Some(other) => {
            top.insert(kind.wire_name().to_string(), other);
            top
        }
        None => top,
    };

    let entries: BTreeMap<String, ActionEntry> =
        serde_json::from_value(serde_json::Value::Object(entries)).map_err(|e| protocol(url, e))?;

    let mut results = Vec::with_capacity(entries.len());
    for (request_id, entry) in entries {
        let state = action_state(url, entry.state)?;
        let result = ActionResult::new(
            kind,
            state,
            optional_timestamp(url, "request_timestamp", entry.request_timestamp)?,
            optional_timestamp(url, "start_timestamp", entry.start_timestamp)?,
            optional_timestamp(url, "finish_timestamp", entry.finish_timestamp)?,
        );
        match result {
            Some(result) => results.push(result.with_request_id(request_id)),
            None => debug!(%url, %request_id, "ignoring action entry without timestamps"),
        }
    }
    Ok(ActionHistory::new(results))
}

fn action_state(url: &Url, code: i64) -> Result<ActionState> {
    match code {
        0 => Ok(ActionState::Pending),
        1 => Ok(ActionState::Running),
        2 => Ok(ActionState::Success),
        3 => Ok(ActionState::Failure),
        other => Err(protocol(url, format!("unknown action state {other}"))),
    }
}

fn optional_timestamp(url: &Url, field: &str, secs: Option<f64>) -> Result<Option<Timestamp>> {
    secs.map(|secs| timestamp(url, field, secs)).transpose()
}

/// Seconds since the epoch, possibly fractional, as a timestamp.
fn timestamp(url: &Url, field: &str, secs: f64) -> Result<Timestamp> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(protocol(url, format!("invalid {field} {secs}")));
    }
    #[allow(clippy::cast_possible_truncation)]
    let millis = (secs * 1000.0).round() as i64;
    Timestamp::from_millisecond(millis).map_err(|e| protocol(url, format!("invalid {field}: {e}")))
}

fn protocol(url: &Url, reason: impl ToString) -> ApiError {
    ApiError::Protocol {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}
