//! Broadcast queue between webhook intake and the fanout dispatcher.
//!
//! Verified payloads are republished here; a dispatcher drains them in
//! batches. Delivery policy is latest-wins: when several payloads queue up
//! before one cycle runs, only the most recent in the batch is delivered
//! and the rest are intentionally dropped, not queued for later.

use tokio::sync::mpsc;
use tracing::trace;

/// Event type assigned to payloads without an explicit hint.
pub const DEFAULT_EVENT_TYPE: &str = "payment_event";

/// One verified payload awaiting broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastMessage {
    /// The verified raw body, republished verbatim.
    pub payload: String,
    /// Classification hint from the provider.
    pub event_type: String,
}

impl BroadcastMessage {
    /// Create a message with the default event type.
    #[must_use]
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            event_type: DEFAULT_EVENT_TYPE.to_string(),
        }
    }

    /// Set the event type hint.
    #[must_use]
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    /// Latest-wins: reduce a batch to the message that gets delivered.
    #[must_use]
    pub fn latest(mut batch: Vec<BroadcastMessage>) -> Option<BroadcastMessage> {
        batch.pop()
    }
}

/// Publishing half of the broadcast queue. Cloneable; store in app state.
#[derive(Debug, Clone)]
pub struct BroadcastQueue {
    tx: mpsc::UnboundedSender<BroadcastMessage>,
}

impl BroadcastQueue {
    /// Republish a verified payload.
    ///
    /// Returns `false` if the dispatcher has shut down.
    pub fn publish(&self, message: BroadcastMessage) -> bool {
        trace!(event_type = %message.event_type, "Republishing payload");
        self.tx.send(message).is_ok()
    }
}

/// Draining half of the broadcast queue, owned by the dispatcher.
#[derive(Debug)]
pub struct BroadcastDrain {
    rx: mpsc::UnboundedReceiver<BroadcastMessage>,
}

impl BroadcastDrain {
    /// Wait for the next batch: at least one message, plus everything else
    /// already queued at that moment.
    ///
    /// Returns `None` once all publishers have been dropped.
    pub async fn next_batch(&mut self) -> Option<Vec<BroadcastMessage>> {
        let first = self.rx.recv().await?;
        let mut batch = vec![first];
        while let Ok(message) = self.rx.try_recv() {
            batch.push(message);
        }
        Some(batch)
    }
}

/// Create a connected queue/drain pair.
#[must_use]
pub fn broadcast_queue() -> (BroadcastQueue, BroadcastDrain) {
    let (tx, rx) = mpsc::unbounded_channel();
    (BroadcastQueue { tx }, BroadcastDrain { rx })
}
