//! Core data model for the rebooter.
//!
//! These types describe what slaveapi tells us about a slave
//! (its record and action history) and what the policy decides to do about it.
//! Wire encodings live in `slaveapi`; nothing here knows about JSON.

mod action;
mod decision;
mod slave;

pub use action::{ActionHistory, ActionKind, ActionRequest, ActionResult, ActionState};
pub use decision::{Decision, Escalation, SkipReason};
pub use slave::{Job, SlaveRecord};
