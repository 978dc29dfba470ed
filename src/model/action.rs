//! Recovery actions: what we can ask slaveapi to do, and what it recorded.
//!
//! slaveapi is authoritative for action results. We never mutate them;
//! we only request new actions and read back the history.

use std::fmt;

use jiff::Timestamp;

/// The two recovery actions the rebooter knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Ask the slave to finish its current job and stop taking new work.
    GracefulShutdown,

    /// Restart the slave host. slaveapi handles retries and escalation.
    Reboot,
}

impl ActionKind {
    /// The action name as it appears in slaveapi URLs.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::GracefulShutdown => "shutdown_buildslave",
            Self::Reboot => "reboot",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GracefulShutdown => f.write_str("graceful shutdown"),
            Self::Reboot => f.write_str("reboot"),
        }
    }
}

/// Lifecycle of a requested action on the slaveapi side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    Pending,
    Running,
    Success,
    Failure,
}

impl ActionState {
    /// Whether slaveapi is still working on the action.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
        };
        f.write_str(s)
    }
}

/// An action to issue, with its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionRequest {
    /// Graceful shutdown; slaveapi waits up to `wait_seconds` for the
    /// slave to acknowledge.
    GracefulShutdown { wait_seconds: u64 },

    Reboot,
}

impl ActionRequest {
    pub const DEFAULT_GRACEFUL_WAIT_SECONDS: u64 = 30;

    pub fn kind(self) -> ActionKind {
        match self {
            Self::GracefulShutdown { .. } => ActionKind::GracefulShutdown,
            Self::Reboot => ActionKind::Reboot,
        }
    }
}

/// One recorded attempt at an action.
///
/// At least one of the three timestamps is always present;
/// [`ActionResult::new`] refuses to build one otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    pub kind: ActionKind,
    pub state: ActionState,

    /// slaveapi's request id, when known.
    pub request_id: Option<String>,

    requested_at: Option<Timestamp>,
    started_at: Option<Timestamp>,
    finished_at: Option<Timestamp>,
}

impl ActionResult {
    /// Builds a result from its timestamps.
    ///
    /// Returns `None` when all three timestamps are absent.
    pub fn new(
        kind: ActionKind,
        state: ActionState,
        requested_at: Option<Timestamp>,
        started_at: Option<Timestamp>,
        finished_at: Option<Timestamp>,
    ) -> Option<Self> {
        if requested_at.is_none() && started_at.is_none() && finished_at.is_none() {
            return None;
        }
        Some(Self {
            kind,
            state,
            request_id: None,
            requested_at,
            started_at,
            finished_at,
        })
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// The most recent of the present timestamps.
    pub fn latest_timestamp(&self) -> Timestamp {
        [self.requested_at, self.started_at, self.finished_at]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(Timestamp::UNIX_EPOCH)
    }
}

/// Every recorded result for one (slave, action kind) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionHistory {
    results: Vec<ActionResult>,
}

impl ActionHistory {
    pub fn new(results: Vec<ActionResult>) -> Self {
        Self { results }
    }

    /// The result with the largest latest timestamp.
    pub fn most_recent(&self) -> Option<&ActionResult> {
        self.results
            .iter()
            .max_by_key(|result| result.latest_timestamp())
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn push(&mut self, result: ActionResult) {
        self.results.push(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(second: i64) -> Timestamp {
        Timestamp::from_second(second).unwrap()
    }

    fn finished(state: ActionState, second: i64) -> ActionResult {
        ActionResult::new(ActionKind::Reboot, state, Some(at(second - 10)), None, Some(at(second)))
            .unwrap()
    }

    #[test]
    fn result_requires_a_timestamp() {
        let result = ActionResult::new(
            ActionKind::GracefulShutdown,
            ActionState::Pending,
            None,
            None,
            None,
        );
        assert!(result.is_none());
    }

    #[test]
    fn latest_timestamp_is_max_of_present_fields() {
        let result = ActionResult::new(
            ActionKind::GracefulShutdown,
            ActionState::Running,
            Some(at(100)),
            Some(at(250)),
            None,
        )
        .unwrap();
        assert_eq!(result.latest_timestamp(), at(250));
    }

    #[test]
    fn latest_timestamp_ignores_field_order() {
        // A finish time earlier than the start is bogus but must not win.
        let result = ActionResult::new(
            ActionKind::Reboot,
            ActionState::Success,
            Some(at(100)),
            Some(at(300)),
            Some(at(200)),
        )
        .unwrap();
        assert_eq!(result.latest_timestamp(), at(300));
    }

    #[test]
    fn most_recent_picks_largest_latest_timestamp() {
        let history = ActionHistory::new(vec![
            finished(ActionState::Failure, 500),
            finished(ActionState::Success, 900),
            finished(ActionState::Failure, 700),
        ]);
        let recent = history.most_recent().unwrap();
        assert_eq!(recent.latest_timestamp(), at(900));
        assert_eq!(recent.state, ActionState::Success);
    }

    #[test]
    fn most_recent_of_empty_history_is_none() {
        assert!(ActionHistory::default().most_recent().is_none());
    }

    #[test]
    fn in_flight_states() {
        assert!(ActionState::Pending.is_in_flight());
        assert!(ActionState::Running.is_in_flight());
        assert!(!ActionState::Success.is_in_flight());
        assert!(!ActionState::Failure.is_in_flight());
    }

    #[test]
    fn request_kind() {
        let graceful = ActionRequest::GracefulShutdown { wait_seconds: 30 };
        assert_eq!(graceful.kind(), ActionKind::GracefulShutdown);
        assert_eq!(ActionRequest::Reboot.kind(), ActionKind::Reboot);
    }

    #[test]
    fn wire_names() {
        assert_eq!(ActionKind::GracefulShutdown.wire_name(), "shutdown_buildslave");
        assert_eq!(ActionKind::Reboot.wire_name(), "reboot");
    }
}
