//! Policy decisions.

use std::fmt;

/// What the policy wants done with a slave on this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Skip(SkipReason),
    IssueGraceful,
    IssueReboot(Escalation),
}

/// Why a slave was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoJobHistory,
    RecentJob,
    GracefulInFlight,
    RebootInFlight,
    RecentRecoveryAttempt,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoJobHistory => "no job history",
            Self::RecentJob => "recent job",
            Self::GracefulInFlight => "graceful in flight",
            Self::RebootInFlight => "reboot in flight; assume success",
            Self::RecentRecoveryAttempt => "recent recovery attempt",
        };
        f.write_str(s)
    }
}

/// How the previous graceful ended before we escalated to a reboot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    GracefulFailed,
    GracefulCompleted,
}

impl fmt::Display for Escalation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GracefulFailed => f.write_str("escalating after graceful failed"),
            Self::GracefulCompleted => f.write_str("escalating after graceful completed"),
        }
    }
}
