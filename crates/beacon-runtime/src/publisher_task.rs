use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use beacon_core::eval::StagedMessage;
use beacon_store::StoreBackend;

use crate::metrics::EngineMetrics;

/// Bounded channel capacity for the publish pipeline.
pub const PUBLISH_CHANNEL_CAPACITY: usize = 256;

/// Consume staged messages and publish them one at a time, preserving the
/// order the evaluator staged them (and therefore per-channel order).
///
/// Shutdown is driven by channel close: when the scheduler finishes its
/// final cycle and drops its sender, `recv()` returns `None` and the task
/// exits after draining the queue. The lifecycle bounds that drain with the
/// configured grace period.
pub async fn run_publisher(
    mut rx: mpsc::Receiver<StagedMessage>,
    store: Arc<dyn StoreBackend>,
    metrics: Option<Arc<EngineMetrics>>,
) {
    while let Some(msg) = rx.recv().await {
        let started = Instant::now();
        let result = store.publish(&msg.channel, &msg.body).await;
        if let Some(ref metrics) = metrics {
            metrics.record_store_op("publish", started.elapsed(), result.is_ok());
        }
        if let Err(e) = result {
            bcn_warn!(store, channel = %msg.channel, error = %e, "publish failed");
        }
    }
    bcn_debug!(store, "publisher drained, exiting");
}
