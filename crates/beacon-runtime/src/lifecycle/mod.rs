mod compile;
mod signal;
mod spawn;
mod types;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use orion_error::prelude::*;
use tokio_util::sync::CancellationToken;

use beacon_config::BeaconConfig;
use beacon_core::TemporalBuffer;
use beacon_store::{RedisStore, StoreBackend};

use crate::error::RuntimeResult;
use crate::metrics::maybe_build_metrics;

pub use signal::wait_for_signal;

use spawn::{spawn_health, spawn_metrics, spawn_publisher, spawn_scheduler};
use types::TaskGroup;

// ---------------------------------------------------------------------------
// Engine — the top-level lifecycle handle
// ---------------------------------------------------------------------------

/// Manages the full lifecycle of the rule engine: compile, run, and
/// graceful shutdown.
///
/// Task groups are stored in start order and joined in reverse (LIFO)
/// during [`wait`](Self::wait): the scheduler finishes its final cycle
/// first, then the publisher drains within the grace period, then the
/// metrics and health tasks stop.
pub struct Engine {
    cancel: CancellationToken,
    groups: Vec<TaskGroup>,
    rule_count: usize,
    layer_count: usize,
}

impl Engine {
    /// Bootstrap against the configured Redis endpoints.
    #[tracing::instrument(name = "engine.start", skip_all)]
    pub async fn start(config: BeaconConfig, base_dir: &Path) -> RuntimeResult<Self> {
        let store = Arc::new(RedisStore::connect(&config.redis).await.err_conv()?);
        let backend: Arc<dyn StoreBackend> = Arc::clone(&store) as Arc<dyn StoreBackend>;
        Self::start_inner(config, base_dir, backend, Some(store)).await
    }

    /// Bootstrap against an arbitrary backend (tests, local runs).
    pub async fn start_with_store(
        config: BeaconConfig,
        base_dir: &Path,
        store: Arc<dyn StoreBackend>,
    ) -> RuntimeResult<Self> {
        Self::start_inner(config, base_dir, store, None).await
    }

    async fn start_inner(
        config: BeaconConfig,
        base_dir: &Path,
        store: Arc<dyn StoreBackend>,
        redis: Option<Arc<RedisStore>>,
    ) -> RuntimeResult<Self> {
        let cancel = CancellationToken::new();

        // Phase 1: parse + compile the rule set into an immutable plan.
        let (plan, _warnings) = compile::compile_plan(&config, base_dir)?;
        let buffer = Arc::new(TemporalBuffer::new(
            &plan.buffer_specs,
            config.engine.buffer_capacity,
        ));
        let metrics = maybe_build_metrics(&config.metrics, &plan);
        bcn_info!(
            sys,
            rules = plan.rule_count(),
            layers = plan.layers.len(),
            buffers = plan.buffer_specs.len(),
            "engine bootstrap complete"
        );

        // Phase 2: spawn task groups.
        let mut groups: Vec<TaskGroup> = Vec::with_capacity(4);

        let grace = Duration::from_millis(config.engine.publish_grace_ms);
        let (publish_tx, publisher_group) =
            spawn_publisher(Arc::clone(&store), metrics.clone(), grace);
        groups.push(publisher_group);

        if let Some(ref metrics) = metrics {
            groups.push(spawn_metrics(
                Arc::clone(metrics),
                &config,
                redis.clone(),
                cancel.child_token(),
            ));
        }

        if let Some(ref redis) = redis
            && config.redis.health_check.enabled
        {
            groups.push(spawn_health(redis, &config, cancel.child_token()));
        }

        let cycle_time = Duration::from_millis(config.engine.effective_cycle_time_ms());
        let rule_count = plan.rule_count();
        let layer_count = plan.layers.len();
        groups.push(spawn_scheduler(
            plan,
            store,
            buffer,
            metrics,
            publish_tx,
            cancel.child_token(),
            cycle_time,
        ));

        Ok(Self {
            cancel,
            groups,
            rule_count,
            layer_count,
        })
    }

    pub fn rule_count(&self) -> usize {
        self.rule_count
    }

    pub fn layer_count(&self) -> usize {
        self.layer_count
    }

    /// Request graceful shutdown of all tasks.
    pub fn shutdown(&self) {
        bcn_info!(sys, "initiating graceful shutdown");
        self.cancel.cancel();
    }

    /// Wait for all task groups to complete after shutdown, LIFO.
    pub async fn wait(mut self) -> RuntimeResult<()> {
        while let Some(group) = self.groups.pop() {
            let name = group.name;
            bcn_debug!(sys, task_group = name, "waiting for task group to finish");
            group.wait().await?;
            bcn_debug!(sys, task_group = name, "task group finished");
        }
        Ok(())
    }

    /// Clone of the root cancellation token (for signal integration).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
