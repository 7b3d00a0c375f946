//! Broadcast fanout engine.
//!
//! Delivers one payload to the full, current set of registered connections
//! and evicts the ones whose endpoints are permanently gone.

use crate::push::{ConnectionPush, PushError};
use crate::registry::{ConnectionId, ConnectionRegistry, StoreError};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Fanout configuration.
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Simultaneous outbound pushes per cycle.
    pub max_concurrent_pushes: usize,
    /// Deadline for a single push; a timed-out push is transient, not gone.
    pub push_timeout: Duration,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_concurrent_pushes: 32,
            push_timeout: Duration::from_secs(10),
        }
    }
}

/// Aggregate counts for one fanout cycle.
///
/// Deliberately coarse: per-connection detail is a tracing concern, not
/// part of the report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutReport {
    /// Connections that received the payload.
    pub delivered: usize,
    /// Stale connections evicted from the registry.
    pub stale_cleaned: usize,
}

/// Delivers payloads to every registered connection.
#[derive(Clone)]
pub struct FanoutEngine {
    registry: ConnectionRegistry,
    push: Arc<dyn ConnectionPush>,
    config: FanoutConfig,
}

impl FanoutEngine {
    /// Create an engine with default configuration.
    #[must_use]
    pub fn new(registry: ConnectionRegistry, push: Arc<dyn ConnectionPush>) -> Self {
        Self::with_config(registry, push, FanoutConfig::default())
    }

    /// Create an engine with custom configuration.
    #[must_use]
    pub fn with_config(
        registry: ConnectionRegistry,
        push: Arc<dyn ConnectionPush>,
        config: FanoutConfig,
    ) -> Self {
        Self {
            registry,
            push,
            config,
        }
    }

    /// Deliver `payload` to every registered connection, then evict the
    /// stale ones.
    ///
    /// Each cycle operates on its own registry snapshot. Pushes are
    /// independent: one failure never blocks delivery to the rest. A push
    /// that fails with [`PushError::Gone`] marks the connection for
    /// eviction; every other failure leaves it registered for the next
    /// broadcast to try again.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be enumerated. Eviction
    /// deletes are best-effort and never fail the cycle.
    pub async fn fanout(&self, payload: &str) -> Result<FanoutReport, StoreError> {
        let connections = self.registry.list_all().await?;
        if connections.is_empty() {
            return Ok(FanoutReport::default());
        }

        let outcomes: Vec<(ConnectionId, Result<(), PushError>)> = stream::iter(connections)
            .map(|id| {
                let push = Arc::clone(&self.push);
                let deadline = self.config.push_timeout;
                async move {
                    let result = match tokio::time::timeout(deadline, push.push(&id, payload)).await
                    {
                        Ok(result) => result,
                        Err(_) => Err(PushError::Timeout),
                    };
                    (id, result)
                }
            })
            .buffer_unordered(self.config.max_concurrent_pushes)
            .collect()
            .await;

        let mut delivered = 0;
        let mut stale: Vec<ConnectionId> = Vec::new();
        for (id, result) in outcomes {
            match result {
                Ok(()) => delivered += 1,
                Err(PushError::Gone) => stale.push(id),
                Err(err) => {
                    // Transient: the next broadcast attempts this connection again.
                    debug!(connection = %id, error = %err, "Push failed, connection kept");
                }
            }
        }

        // `stale_cleaned` counts attempted evictions: a failed delete is
        // logged and left for a later cycle to retry, matching the
        // best-effort cleanup contract.
        let stale_cleaned = stale.len();
        for id in &stale {
            if let Err(err) = self.registry.remove(id).await {
                warn!(connection = %id, error = %err, "Stale connection eviction failed");
            }
        }

        debug!(delivered, stale_cleaned, "Fanout cycle complete");
        Ok(FanoutReport {
            delivered,
            stale_cleaned,
        })
    }
}
