//! WebSocket push gateway.
//!
//! The gateway holds a bounded outbound channel per attached connection.
//! Socket tasks drain their receiver and write to the wire; the fanout
//! engine pushes through [`ConnectionPush`]. A missing or closed channel is
//! the gateway's canonical "gone" signal.

use async_trait::async_trait;
use cascade_core::{ConnectionId, ConnectionPush, PushError};
use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Outbound messages buffered per connection before pushes wait.
    pub outbound_buffer: usize,
    /// How long a push may wait for buffer space before failing as
    /// transient.
    pub enqueue_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 64,
            enqueue_timeout: Duration::from_secs(1),
        }
    }
}

/// Owns the outbound channel for every attached connection.
pub struct WebSocketGateway {
    connections: DashMap<String, mpsc::Sender<String>>,
    config: GatewayConfig,
}

impl WebSocketGateway {
    /// Create a gateway with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(GatewayConfig::default())
    }

    /// Create a gateway with custom configuration.
    #[must_use]
    pub fn with_config(config: GatewayConfig) -> Self {
        Self {
            connections: DashMap::new(),
            config,
        }
    }

    /// Attach a connection, returning the receiver its socket task drains.
    ///
    /// Re-attaching an ID replaces the previous channel.
    pub fn attach(&self, id: &ConnectionId) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(self.config.outbound_buffer);
        self.connections.insert(id.as_str().to_string(), tx);
        debug!(connection = %id, "Connection attached");
        rx
    }

    /// Detach a connection when its socket closes.
    ///
    /// The registry entry is left alone: reconciling it is the fanout
    /// engine's job, once a push reports the endpoint gone.
    pub fn detach(&self, id: &ConnectionId) {
        if self.connections.remove(id.as_str()).is_some() {
            debug!(connection = %id, "Connection detached");
        }
    }

    /// Whether a connection is currently attached.
    #[must_use]
    pub fn is_attached(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id.as_str())
    }

    /// Number of attached connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }
}

impl Default for WebSocketGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionPush for WebSocketGateway {
    async fn push(&self, id: &ConnectionId, payload: &str) -> Result<(), PushError> {
        // Clone the sender out so the map shard is not held across the send.
        let Some(tx) = self.connections.get(id.as_str()).map(|e| e.value().clone()) else {
            return Err(PushError::Gone);
        };

        match tokio::time::timeout(self.config.enqueue_timeout, tx.send(payload.to_string())).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                // Receiver dropped: the socket task ended, so the endpoint
                // is gone. Drop the dead channel eagerly.
                self.connections.remove(id.as_str());
                Err(PushError::Gone)
            }
            Err(_) => Err(PushError::Timeout),
        }
    }
}
