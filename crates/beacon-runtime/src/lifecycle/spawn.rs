use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use beacon_config::BeaconConfig;
use beacon_core::eval::StagedMessage;
use beacon_core::TemporalBuffer;
use beacon_lang::plan::RulePlan;
use beacon_store::{RedisStore, StoreBackend};

use crate::metrics::{EngineMetrics, run_metrics_task};
use crate::publisher_task::{PUBLISH_CHANNEL_CAPACITY, run_publisher};
use crate::scheduler::CycleScheduler;

use super::types::TaskGroup;

/// Publisher task: consumes staged messages until the scheduler drops its
/// sender; its join is bounded by the publish grace period.
pub(super) fn spawn_publisher(
    store: Arc<dyn StoreBackend>,
    metrics: Option<Arc<EngineMetrics>>,
    grace: Duration,
) -> (mpsc::Sender<StagedMessage>, TaskGroup) {
    let (tx, rx) = mpsc::channel(PUBLISH_CHANNEL_CAPACITY);
    let mut group = TaskGroup::new("publisher").with_join_timeout(grace);
    group.push(tokio::spawn(async move {
        run_publisher(rx, store, metrics).await;
        Ok(())
    }));
    (tx, group)
}

pub(super) fn spawn_scheduler(
    plan: Arc<RulePlan>,
    store: Arc<dyn StoreBackend>,
    buffer: Arc<TemporalBuffer>,
    metrics: Option<Arc<EngineMetrics>>,
    publish_tx: mpsc::Sender<StagedMessage>,
    cancel: CancellationToken,
    cycle_time: Duration,
) -> TaskGroup {
    let scheduler = CycleScheduler::new(plan, store, buffer, metrics, publish_tx, cancel, cycle_time);
    let mut group = TaskGroup::new("scheduler");
    group.push(tokio::spawn(scheduler.run()));
    group
}

pub(super) fn spawn_metrics(
    metrics: Arc<EngineMetrics>,
    config: &BeaconConfig,
    store: Option<Arc<RedisStore>>,
    cancel: CancellationToken,
) -> TaskGroup {
    let mut group = TaskGroup::new("metrics");
    group.push(tokio::spawn(run_metrics_task(
        metrics,
        config.metrics.clone(),
        store,
        cancel,
    )));
    group
}

pub(super) fn spawn_health(
    store: &Arc<RedisStore>,
    config: &BeaconConfig,
    cancel: CancellationToken,
) -> TaskGroup {
    let handle = store.spawn_health_task(&config.redis.health_check, cancel);
    let mut group = TaskGroup::new("health");
    group.push(tokio::spawn(async move {
        let _ = handle.await;
        Ok(())
    }));
    group
}
