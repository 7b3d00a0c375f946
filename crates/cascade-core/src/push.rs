//! Push-to-connection capability.
//!
//! The fanout engine delivers through this trait; the transport crate
//! provides the implementation.

use crate::registry::ConnectionId;
use async_trait::async_trait;
use thiserror::Error;

/// Push errors.
#[derive(Debug, Error)]
pub enum PushError {
    /// The endpoint behind the connection is permanently gone.
    ///
    /// This is the canonical stale signal; the fanout engine evicts the
    /// connection from the registry on seeing it.
    #[error("connection gone")]
    Gone,

    /// The push did not complete within its deadline. Transient.
    #[error("push timed out")]
    Timeout,

    /// Any other delivery failure. Transient.
    #[error("push failed: {0}")]
    Transport(String),
}

impl PushError {
    /// Whether this failure means the endpoint is permanently unreachable.
    #[must_use]
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Gone)
    }
}

/// A capability that delivers a payload to one specific connection.
#[async_trait]
pub trait ConnectionPush: Send + Sync {
    /// Deliver `payload` to the connection identified by `id`.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Gone`] when the endpoint is confirmed torn
    /// down, and a transient variant otherwise.
    async fn push(&self, id: &ConnectionId, payload: &str) -> Result<(), PushError>;
}
