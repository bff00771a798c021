use std::time::{Duration, Instant};

use async_trait::async_trait;

use beacon_core::eval::WriteSet;
use beacon_core::{CycleSnapshot, TaggedValue};

use crate::error::StoreResult;

/// One buffered-series append, persisted under `buffer:<key>` as a
/// `"<millis>:<scalar>"` list entry capped at `max_items`.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferAppend {
    pub key: String,
    pub value: TaggedValue,
    pub ts_ms: i64,
    pub max_items: usize,
}

/// The committable part of a cycle: `set` outputs plus buffered series.
/// Messages are dispatched separately, after the batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub sets: Vec<(String, TaggedValue)>,
    pub buffers: Vec<BufferAppend>,
}

impl WriteBatch {
    /// Build a batch from a cycle's staged writes, resolving same-key
    /// writes last-writer-wins and stamping buffer entries with the cycle
    /// timestamp.
    pub fn from_write_set(ws: &WriteSet, at_ms: i64) -> Self {
        Self {
            sets: ws.final_sets(),
            buffers: ws
                .buffers
                .iter()
                .map(|b| BufferAppend {
                    key: b.key.clone(),
                    value: b.value.clone(),
                    ts_ms: at_ms,
                    max_items: b.max_items,
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty() && self.buffers.is_empty()
    }
}

/// Health of one endpoint as seen through the pool.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointHealth {
    pub endpoint: String,
    pub ok: bool,
    pub latency: Duration,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthReport {
    pub endpoints: Vec<EndpointHealth>,
}

impl HealthReport {
    pub fn ok(&self) -> bool {
        !self.endpoints.is_empty() && self.endpoints.iter().any(|e| e.ok)
    }
}

/// The store seam the scheduler drives. `RedisStore` is the production
/// implementation; `MemoryStore` backs tests and local runs.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Scan all keys under the given prefixes and decode them into a
    /// frozen snapshot. Missing or undecodable entries come back
    /// `Unavailable`.
    async fn snapshot_inputs(&self, prefixes: &[String]) -> StoreResult<CycleSnapshot>;

    async fn read_value(&self, key: &str) -> StoreResult<TaggedValue>;

    /// Commit a batch: every `set` key is written atomically (no partial
    /// key), buffered series are appended and trimmed to `max_items`.
    /// Retries stop at `deadline`, the remaining cycle budget.
    async fn write_batch(&self, batch: &WriteBatch, deadline: Option<Instant>) -> StoreResult<()>;

    /// Fire-and-forget pub/sub emission; at-least-once on success.
    async fn publish(&self, channel: &str, message: &str) -> StoreResult<()>;

    async fn health(&self) -> HealthReport;
}
