//! Broadcast dispatcher.
//!
//! Drains the broadcast queue and runs one fanout cycle per batch, applying
//! the latest-wins policy: payloads superseded within a batch are dropped,
//! not queued for later.

use crate::metrics;
use cascade_core::{BroadcastDrain, BroadcastMessage, FanoutEngine, FanoutReport};
use std::time::Instant;
use tracing::{debug, error, info};

/// Drain batches until every publisher is gone.
pub async fn run(mut drain: BroadcastDrain, engine: FanoutEngine) {
    while let Some(batch) = drain.next_batch().await {
        run_cycle(batch, &engine).await;
    }
    debug!("Broadcast queue closed, dispatcher exiting");
}

/// Run one fanout cycle over a batch.
async fn run_cycle(batch: Vec<BroadcastMessage>, engine: &FanoutEngine) -> Option<FanoutReport> {
    let superseded = batch.len().saturating_sub(1);
    let message = BroadcastMessage::latest(batch)?;
    if superseded > 0 {
        debug!(superseded, "Superseded payloads dropped (latest wins)");
    }

    let start = Instant::now();
    match engine.fanout(&message.payload).await {
        Ok(report) => {
            metrics::record_broadcast(&report);
            metrics::record_fanout_seconds(start.elapsed().as_secs_f64());
            info!(
                event_type = %message.event_type,
                delivered = report.delivered,
                stale_cleaned = report.stale_cleaned,
                "Broadcast complete"
            );
            Some(report)
        }
        Err(err) => {
            metrics::record_error("fanout");
            error!(error = %err, "Broadcast cycle failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::{ConnectionId, ConnectionPush, ConnectionRegistry, MemoryStore};
    use cascade_transport::WebSocketGateway;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cycle_delivers_latest_payload_only() {
        let registry = ConnectionRegistry::new(Arc::new(MemoryStore::new()));
        let gateway = Arc::new(WebSocketGateway::new());
        let engine = FanoutEngine::new(
            registry.clone(),
            Arc::clone(&gateway) as Arc<dyn ConnectionPush>,
        );

        let id = ConnectionId::from("c1");
        registry.register(&id).await.unwrap();
        let mut rx = gateway.attach(&id);

        let batch = vec![
            BroadcastMessage::new("a"),
            BroadcastMessage::new("b"),
            BroadcastMessage::new("c"),
        ];
        let report = run_cycle(batch, &engine).await.unwrap();
        assert_eq!(report.delivered, 1);

        assert_eq!(rx.recv().await.unwrap(), "c");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cycle_with_empty_batch() {
        let registry = ConnectionRegistry::new(Arc::new(MemoryStore::new()));
        let gateway = Arc::new(WebSocketGateway::new());
        let engine = FanoutEngine::new(registry, Arc::clone(&gateway) as Arc<dyn ConnectionPush>);

        assert!(run_cycle(Vec::new(), &engine).await.is_none());
    }
}
