//! The idle policy: decide what, if anything, to do about a slave.
//!
//! Pure. The caller supplies `now` so the decision can be pinned in tests.
//!
//! A slave is acted on only when it has been idle for at least the threshold
//! and nothing we asked for earlier is still in flight. The first action is
//! always a graceful shutdown; once a graceful has run its course since the
//! slave went idle, the next pass escalates to a reboot.

use jiff::{SignedDuration, Timestamp};

use crate::model::{ActionState, Decision, Escalation, SkipReason};
use crate::state::SlaveState;

/// How long a slave must be idle before we act: five hours.
pub const DEFAULT_IDLE_THRESHOLD: SignedDuration = SignedDuration::from_secs(5 * 60 * 60);

/// Decide what to do with a slave given its extracted state.
pub fn decide(state: &SlaveState, now: Timestamp, idle_threshold: SignedDuration) -> Decision {
    let Some(last_job_end) = state.last_job_end else {
        return Decision::Skip(SkipReason::NoJobHistory);
    };

    if now.duration_since(last_job_end) < idle_threshold {
        return Decision::Skip(SkipReason::RecentJob);
    }

    let graceful = state.most_recent_graceful.as_ref();
    let reboot = state.most_recent_reboot.as_ref();

    if graceful.is_some_and(|g| g.state.is_in_flight()) {
        return Decision::Skip(SkipReason::GracefulInFlight);
    }
    if reboot.is_some_and(|r| r.state.is_in_flight()) {
        return Decision::Skip(SkipReason::RebootInFlight);
    }

    // Give the previous recovery attempt time to work.
    let idle_ref = state.idle_since.unwrap_or(last_job_end);
    if now.duration_since(idle_ref) < idle_threshold {
        return Decision::Skip(SkipReason::RecentRecoveryAttempt);
    }

    match graceful {
        Some(g) if g.latest_timestamp() > idle_ref => {
            let escalation = if g.state == ActionState::Failure {
                Escalation::GracefulFailed
            } else {
                Escalation::GracefulCompleted
            };
            Decision::IssueReboot(escalation)
        }
        // No graceful since the slave went idle; ties re-issue the graceful.
        _ => Decision::IssueGraceful,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActionKind, ActionResult};

    const NOW: i64 = 1_000_000;

    fn at(second: i64) -> Timestamp {
        Timestamp::from_second(second).unwrap()
    }

    fn action(kind: ActionKind, state: ActionState, second: i64) -> ActionResult {
        ActionResult::new(kind, state, None, Some(at(second)), None).unwrap()
    }

    fn state(
        last_job_end: Option<i64>,
        graceful: Option<(ActionState, i64)>,
        reboot: Option<(ActionState, i64)>,
    ) -> SlaveState {
        let last_job_end = last_job_end.map(at);
        let most_recent_graceful =
            graceful.map(|(s, t)| action(ActionKind::GracefulShutdown, s, t));
        let most_recent_reboot = reboot.map(|(s, t)| action(ActionKind::Reboot, s, t));
        let reboot_ts = most_recent_reboot.as_ref().map(ActionResult::latest_timestamp);
        let idle_since = match (last_job_end, reboot_ts) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        SlaveState {
            last_job_end,
            most_recent_graceful,
            most_recent_reboot,
            idle_since,
        }
    }

    fn decide_now(state: &SlaveState) -> Decision {
        decide(state, at(NOW), DEFAULT_IDLE_THRESHOLD)
    }

    #[test]
    fn no_job_history_skips() {
        let s = state(None, None, Some((ActionState::Success, 100)));
        assert_eq!(decide_now(&s), Decision::Skip(SkipReason::NoJobHistory));
    }

    #[test]
    fn fresh_idle_slave_gets_graceful() {
        let s = state(Some(900_000), None, None);
        assert_eq!(decide_now(&s), Decision::IssueGraceful);
    }

    #[test]
    fn failed_graceful_escalates_to_reboot() {
        let s = state(Some(900_000), Some((ActionState::Failure, 950_000)), None);
        assert_eq!(
            decide_now(&s),
            Decision::IssueReboot(Escalation::GracefulFailed)
        );
    }

    #[test]
    fn completed_graceful_escalates_to_reboot() {
        let s = state(Some(900_000), Some((ActionState::Success, 950_000)), None);
        assert_eq!(
            decide_now(&s),
            Decision::IssueReboot(Escalation::GracefulCompleted)
        );
    }

    #[test]
    fn graceful_in_flight_skips() {
        for in_flight in [ActionState::Pending, ActionState::Running] {
            let s = state(Some(900_000), Some((in_flight, 999_990)), None);
            assert_eq!(decide_now(&s), Decision::Skip(SkipReason::GracefulInFlight));
        }
    }

    #[test]
    fn reboot_in_flight_skips() {
        let s = state(Some(900_000), None, Some((ActionState::Running, 800_000)));
        assert_eq!(decide_now(&s), Decision::Skip(SkipReason::RebootInFlight));
    }

    #[test]
    fn recent_job_skips() {
        let s = state(Some(999_000), None, None);
        assert_eq!(decide_now(&s), Decision::Skip(SkipReason::RecentJob));
    }

    #[test]
    fn recent_job_wins_over_in_flight_graceful() {
        let s = state(Some(999_000), Some((ActionState::Running, 999_500)), None);
        assert_eq!(decide_now(&s), Decision::Skip(SkipReason::RecentJob));
    }

    #[test]
    fn recent_reboot_skips() {
        let s = state(Some(500_000), None, Some((ActionState::Success, 995_000)));
        assert_eq!(s.idle_since, Some(at(995_000)));
        assert_eq!(
            decide_now(&s),
            Decision::Skip(SkipReason::RecentRecoveryAttempt)
        );
    }

    #[test]
    fn job_ending_exactly_at_threshold_is_idle() {
        // now - last_job_end == threshold is not "recent"; the check is strict.
        let s = state(Some(NOW - 18_000), None, None);
        assert_eq!(decide_now(&s), Decision::IssueGraceful);
    }

    #[test]
    fn job_ending_just_inside_threshold_is_recent() {
        let s = state(Some(NOW - 17_999), None, None);
        assert_eq!(decide_now(&s), Decision::Skip(SkipReason::RecentJob));
    }

    #[test]
    fn graceful_equal_to_idle_since_reissues_graceful() {
        let s = state(Some(900_000), Some((ActionState::Success, 900_000)), None);
        assert_eq!(decide_now(&s), Decision::IssueGraceful);
    }

    #[test]
    fn graceful_before_idle_since_reissues_graceful() {
        // The graceful predates the last reboot: the slave is idle again since then.
        let s = state(
            Some(500_000),
            Some((ActionState::Failure, 600_000)),
            Some((ActionState::Success, 700_000)),
        );
        assert_eq!(decide_now(&s), Decision::IssueGraceful);
    }

    #[test]
    fn graceful_after_old_reboot_escalates() {
        let s = state(
            Some(500_000),
            Some((ActionState::Failure, 800_000)),
            Some((ActionState::Failure, 700_000)),
        );
        assert_eq!(
            decide_now(&s),
            Decision::IssueReboot(Escalation::GracefulFailed)
        );
    }

    #[test]
    fn no_action_while_any_action_in_flight() {
        let in_flight = [ActionState::Pending, ActionState::Running];
        for g in in_flight {
            for r in in_flight {
                let s = state(Some(100), Some((g, 200)), Some((r, 300)));
                assert!(matches!(decide_now(&s), Decision::Skip(_)));
            }
        }
    }

    #[test]
    fn reboot_only_after_settled_graceful_since_idle() {
        // Sweep graceful times and states; whenever a reboot comes out,
        // the graceful must be settled and newer than idle_since.
        let states = [
            ActionState::Pending,
            ActionState::Running,
            ActionState::Success,
            ActionState::Failure,
        ];
        for gs in states {
            for g_ts in [100_000, 500_000, 600_000, 990_000] {
                let s = state(Some(500_000), Some((gs, g_ts)), None);
                if let Decision::IssueReboot(_) = decide_now(&s) {
                    let g = s.most_recent_graceful.as_ref().unwrap();
                    assert!(!g.state.is_in_flight());
                    assert!(g.latest_timestamp() > s.idle_since.unwrap());
                }
            }
        }
    }

    #[test]
    fn custom_threshold_is_respected() {
        let s = state(Some(NOW - 60), None, None);
        assert_eq!(
            decide(&s, at(NOW), SignedDuration::from_secs(30)),
            Decision::IssueGraceful
        );
        assert_eq!(
            decide(&s, at(NOW), SignedDuration::from_secs(120)),
            Decision::Skip(SkipReason::RecentJob)
        );
    }
}
