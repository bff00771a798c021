use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use beacon_core::eval::StagedMessage;
use beacon_core::{Evaluator, TemporalBuffer};
use beacon_lang::plan::RulePlan;
use beacon_store::{StoreBackend, WriteBatch};

use crate::metrics::EngineMetrics;

/// Key prefixes snapshotted at the start of every cycle.
const SNAPSHOT_PREFIXES: &[&str] = &["input:", "output:"];

/// Minimum spacing between repeated overrun warnings.
const OVERRUN_LOG_WINDOW: Duration = Duration::from_secs(10);

/// Drives fixed-period cycles: snapshot → buffer append → evaluate →
/// commit → publish handoff → sleep.
///
/// Evaluation is strictly sequential; cycles never overlap. A cycle that
/// runs longer than the period starts the next one immediately and counts
/// an overrun. On cancellation the current cycle completes (including its
/// commit) before the loop exits.
pub struct CycleScheduler {
    store: Arc<dyn StoreBackend>,
    evaluator: Evaluator,
    buffer: Arc<TemporalBuffer>,
    metrics: Option<Arc<EngineMetrics>>,
    publish_tx: mpsc::Sender<StagedMessage>,
    cancel: CancellationToken,
    cycle_time: Duration,
    prefixes: Vec<String>,
    last_overrun_log: Option<Instant>,
}

impl CycleScheduler {
    pub fn new(
        plan: Arc<RulePlan>,
        store: Arc<dyn StoreBackend>,
        buffer: Arc<TemporalBuffer>,
        metrics: Option<Arc<EngineMetrics>>,
        publish_tx: mpsc::Sender<StagedMessage>,
        cancel: CancellationToken,
        cycle_time: Duration,
    ) -> Self {
        Self {
            store,
            evaluator: Evaluator::new(plan),
            buffer,
            metrics,
            publish_tx,
            cancel,
            cycle_time,
            prefixes: SNAPSHOT_PREFIXES.iter().map(|p| p.to_string()).collect(),
            last_overrun_log: None,
        }
    }

    /// Run cycles until cancelled.
    #[tracing::instrument(name = "scheduler", skip_all)]
    pub async fn run(mut self) -> anyhow::Result<()> {
        bcn_info!(
            cycle,
            period_ms = self.cycle_time.as_millis() as u64,
            rules = self.evaluator.plan().rule_count(),
            "cycle scheduler started"
        );
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let started = Instant::now();
            self.run_cycle(started + self.cycle_time).await;
            let elapsed = started.elapsed();

            if elapsed > self.cycle_time {
                self.note_overrun(elapsed);
                continue;
            }
            if let Some(ref metrics) = self.metrics {
                metrics.observe_cycle(elapsed, Duration::ZERO);
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.cycle_time - elapsed) => {}
            }
        }
        bcn_info!(cycle, "cycle scheduler stopped");
        Ok(())
    }

    /// Drive a fixed number of cycles back to back (test mode).
    pub async fn run_cycles(&mut self, n: usize) {
        for _ in 0..n {
            let started = Instant::now();
            self.run_cycle(started + self.cycle_time).await;
        }
    }

    /// One fetch → evaluate → commit → publish pass. `deadline` is the end
    /// of this cycle's budget; commit retries stop there.
    async fn run_cycle(&mut self, deadline: Instant) {
        // 1. Frozen snapshot of the store.
        let snapshot_started = Instant::now();
        let snapshot = match self.store.snapshot_inputs(&self.prefixes).await {
            Ok(snap) => {
                if let Some(ref metrics) = self.metrics {
                    metrics.record_store_op("snapshot", snapshot_started.elapsed(), true);
                }
                snap
            }
            Err(e) => {
                // Read failure skips the whole cycle; next tick retries.
                if let Some(ref metrics) = self.metrics {
                    metrics.record_store_op("snapshot", snapshot_started.elapsed(), false);
                    metrics.inc_cycle_error();
                }
                bcn_warn!(cycle, error = %e, "snapshot failed, skipping cycle");
                return;
            }
        };

        // 2. Feed the temporal rings.
        for (key, value) in &snapshot.values {
            self.buffer.append(key, value.clone(), snapshot.at_ms);
        }

        // 3. Evaluate the plan.
        let (write_set, report) = self.evaluator.evaluate(&snapshot, &self.buffer);
        if let Some(ref metrics) = self.metrics {
            metrics.record_report(&report);
        }

        // 4. Commit outputs in one batch.
        let batch = WriteBatch::from_write_set(&write_set, snapshot.at_ms);
        if !batch.is_empty() {
            let write_started = Instant::now();
            match self.store.write_batch(&batch, Some(deadline)).await {
                Ok(()) => {
                    self.evaluator.mark_committed(&write_set);
                    if let Some(ref metrics) = self.metrics {
                        metrics.record_store_op("write", write_started.elapsed(), true);
                        for (key, _) in &batch.sets {
                            metrics.record_output(key);
                        }
                    }
                    bcn_debug!(
                        cycle,
                        sets = batch.sets.len(),
                        buffers = batch.buffers.len(),
                        "cycle committed"
                    );
                }
                Err(e) => {
                    // Discard this commit; emit state is untouched so the
                    // values stage again next cycle.
                    if let Some(ref metrics) = self.metrics {
                        metrics.record_store_op("write", write_started.elapsed(), false);
                        metrics.inc_commit_failure();
                    }
                    bcn_error!(cycle, error = %e, "commit failed, discarding write set");
                }
            }
        }

        // 5. Hand messages to the publisher; dispatch happens off-cycle.
        for message in write_set.messages {
            if self.publish_tx.send(message).await.is_err() {
                bcn_warn!(cycle, "publish channel closed, dropping message");
                break;
            }
        }
    }

    fn note_overrun(&mut self, elapsed: Duration) {
        if let Some(ref metrics) = self.metrics {
            metrics.inc_overrun();
            metrics.observe_cycle(elapsed, elapsed - self.cycle_time);
        }
        let now = Instant::now();
        let should_log = self
            .last_overrun_log
            .is_none_or(|t| now.duration_since(t) >= OVERRUN_LOG_WINDOW);
        if should_log {
            self.last_overrun_log = Some(now);
            bcn_warn!(
                cycle,
                elapsed_ms = elapsed.as_millis() as u64,
                period_ms = self.cycle_time.as_millis() as u64,
                "cycle overrun, starting next cycle immediately"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
