//! Typed access to slaveapi, the slave-management service.
//!
//! [`SlaveApi`] is what the processor talks to. [`HttpSlaveApi`] implements
//! it over HTTP/JSON with retries on transport failures; tests substitute an
//! in-memory fake.

mod http;
mod retry;

#[cfg(test)]
pub mod fake;

pub use http::HttpSlaveApi;
pub use retry::RetryPolicy;

use crate::model::{ActionHistory, ActionKind, ActionRequest, ActionResult, SlaveRecord};

/// Errors returned by slaveapi calls.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Transport failure that persisted through every retry.
    #[error("slaveapi unreachable at {url} after {attempts} attempts: {source}")]
    Unavailable {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    /// slaveapi answered, but not with success. Never retried.
    #[error("slaveapi returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// The response did not match the expected schema.
    #[error("malformed response from {url}: {reason}")]
    Protocol { url: String, reason: String },

    /// The HTTP client itself could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl ApiError {
    /// Whether the failure points at a misbehaving service rather than an
    /// unreachable one. Those are reported at warning level.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Status { .. } | Self::Protocol { .. })
    }
}

pub type Result<T> = core::result::Result<T, ApiError>;

/// The slaveapi operations the rebooter needs.
///
/// Implementations must be safe to share across processor threads.
pub trait SlaveApi: Send + Sync {
    /// Names of every enabled production slave, in listing order.
    fn list_production_slaves(&self) -> Result<Vec<String>>;

    fn fetch_slave(&self, name: &str) -> Result<SlaveRecord>;

    fn fetch_action_history(&self, name: &str, kind: ActionKind) -> Result<ActionHistory>;

    /// Request a new action. The returned result carries slaveapi's request id.
    fn issue_action(&self, name: &str, request: ActionRequest) -> Result<ActionResult>;
}
