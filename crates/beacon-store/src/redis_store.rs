//! Redis-backed [`StoreBackend`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::StreamExt;
use orion_error::prelude::*;
use orion_error::ErrorOweBase;
use redis::aio::ConnectionManager;
use tokio_util::sync::CancellationToken;

use beacon_config::RedisConfig;
use beacon_core::value::{decode_hash, decode_wire, encode_wire};
use beacon_core::{CycleSnapshot, TaggedValue};

use crate::backend::{EndpointHealth, HealthReport, StoreBackend, WriteBatch};
use crate::codec::{buffer_key, format_buffer_entry};
use crate::error::{StoreReason, StoreResult, is_transient};
use crate::pool::ConnectionPool;
use crate::retry::RetryPolicy;
use crate::throttle::LogThrottle;

pub struct RedisStore {
    pool: ConnectionPool,
    retry: RetryPolicy,
    throttle: LogThrottle,
    sync_timeout: Duration,
    failure_threshold: u32,
}

impl RedisStore {
    /// Open the connection pool and wrap it with the retry/throttle policy
    /// from config.
    pub async fn connect(cfg: &RedisConfig) -> StoreResult<Self> {
        let pool = ConnectionPool::connect(cfg).await?;
        Ok(Self {
            pool,
            retry: RetryPolicy::new(
                cfg.retry_count.max(1),
                Duration::from_millis(cfg.retry_base_delay_ms),
            ),
            throttle: LogThrottle::default(),
            sync_timeout: Duration::from_millis(cfg.sync_timeout_ms),
            failure_threshold: cfg.health_check.failure_threshold.max(1),
        })
    }

    /// Healthy pool slots, for the `redis_connections_active` gauge.
    pub fn active_connections(&self) -> usize {
        self.pool.active_count()
    }

    /// Subscribe a handler to a channel on a dedicated pub/sub connection.
    /// The returned task runs until aborted or the connection dies.
    pub async fn subscribe(
        &self,
        channel: &str,
        handler: impl Fn(String) + Send + Sync + 'static,
    ) -> StoreResult<tokio::task::JoinHandle<()>> {
        let client = self.pool.any_client();
        let mut pubsub = client.get_async_pubsub().await.owe(StoreReason::Pool)?;
        pubsub.subscribe(channel).await.owe(StoreReason::Transient)?;
        let channel = channel.to_string();
        Ok(tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                match msg.get_payload::<String>() {
                    Ok(payload) => handler(payload),
                    Err(e) => {
                        tracing::warn!(channel = %channel, error = %e, "pubsub payload decode failed");
                    }
                }
            }
            tracing::debug!(channel = %channel, "pubsub stream closed");
        }))
    }

    /// Periodically ping every pool slot; consecutive failures beyond the
    /// configured threshold mark the slot unhealthy and trigger a rebuild.
    pub fn spawn_health_task(
        self: &Arc<Self>,
        cfg: &beacon_config::HealthCheckConfig,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        let interval = Duration::from_secs(cfg.interval_sec.max(1));
        let timeout = Duration::from_millis(cfg.timeout_ms.max(1));
        let threshold = cfg.failure_threshold.max(1);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        for idx in 0..store.pool.len() {
                            let (_, conn) = store.pool.acquire_slot(idx).await;
                            if ping(conn, timeout).await {
                                store.pool.record_success(idx);
                            } else {
                                store.pool.record_failure(idx, threshold);
                                store.pool.reconnect_slot(idx).await;
                            }
                        }
                    }
                }
            }
        })
    }

    /// Run one operation against a pooled connection with per-attempt
    /// timeout and exponential backoff on transient errors.
    async fn with_retry<T, F, Fut>(
        &self,
        op: &'static str,
        deadline: Option<Instant>,
        f: F,
    ) -> StoreResult<T>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: std::future::Future<Output = redis::RedisResult<T>>,
    {
        let mut attempt: u32 = 1;
        loop {
            let (idx, conn) = self.pool.acquire().await;
            let (transient, detail) = match tokio::time::timeout(self.sync_timeout, f(conn)).await {
                Ok(Ok(value)) => {
                    self.pool.record_success(idx);
                    return Ok(value);
                }
                Ok(Err(e)) => (is_transient(&e), e.to_string()),
                Err(_) => (true, format!("timed out after {:?}", self.sync_timeout)),
            };
            self.pool.record_failure(idx, self.failure_threshold);

            if transient && let Some(delay) = self.retry.delay_within(attempt, deadline) {
                if let Some(suppressed) = self.throttle.allow(op) {
                    tracing::warn!(
                        op,
                        attempt,
                        suppressed,
                        error = %detail,
                        "transient store error, retrying"
                    );
                }
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            if let Some(suppressed) = self.throttle.allow(op) {
                tracing::error!(op, attempts = attempt, suppressed, error = %detail, "store operation failed");
            }
            return StructError::from(StoreReason::Failure)
                .with_detail(format!("{op}: {detail}"))
                .err();
        }
    }
}

#[async_trait]
impl StoreBackend for RedisStore {
    async fn snapshot_inputs(&self, prefixes: &[String]) -> StoreResult<CycleSnapshot> {
        let prefixes = prefixes.to_vec();
        let values = self
            .with_retry("snapshot", None, move |mut conn| {
                let prefixes = prefixes.clone();
                async move {
                    let mut values: HashMap<String, TaggedValue> = HashMap::new();
                    for prefix in &prefixes {
                        let pattern = format!("{prefix}*");
                        let mut cursor: u64 = 0;
                        loop {
                            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                                .arg(cursor)
                                .arg("MATCH")
                                .arg(&pattern)
                                .arg("COUNT")
                                .arg(512)
                                .query_async(&mut conn)
                                .await?;
                            fetch_keys(&mut conn, &keys, &mut values).await?;
                            cursor = next;
                            if cursor == 0 {
                                break;
                            }
                        }
                    }
                    Ok(values)
                }
            })
            .await?;
        Ok(CycleSnapshot {
            values,
            at_ms: epoch_ms(),
        })
    }

    async fn read_value(&self, key: &str) -> StoreResult<TaggedValue> {
        let key = key.to_string();
        self.with_retry("read", None, move |mut conn| {
            let key = key.clone();
            async move {
                let mut values = HashMap::new();
                fetch_keys(&mut conn, std::slice::from_ref(&key), &mut values).await?;
                Ok(values.remove(&key).unwrap_or(TaggedValue::Unavailable))
            }
        })
        .await
    }

    async fn write_batch(&self, batch: &WriteBatch, deadline: Option<Instant>) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let batch = batch.clone();
        self.with_retry("write", deadline, move |mut conn| {
            let batch = batch.clone();
            async move {
                let mut pipe = redis::pipe();
                for (key, value) in &batch.sets {
                    pipe.cmd("SET").arg(key).arg(encode_wire(value)).ignore();
                }
                for append in &batch.buffers {
                    let key = buffer_key(&append.key);
                    pipe.cmd("RPUSH")
                        .arg(&key)
                        .arg(format_buffer_entry(append.ts_ms, &append.value))
                        .ignore();
                    pipe.cmd("LTRIM")
                        .arg(&key)
                        .arg(-(append.max_items as i64))
                        .arg(-1)
                        .ignore();
                }
                let _: () = pipe.query_async(&mut conn).await?;
                Ok(())
            }
        })
        .await
    }

    async fn publish(&self, channel: &str, message: &str) -> StoreResult<()> {
        let channel = channel.to_string();
        let message = message.to_string();
        self.with_retry("publish", None, move |mut conn| {
            let channel = channel.clone();
            let message = message.clone();
            async move {
                let _: i64 = redis::cmd("PUBLISH")
                    .arg(&channel)
                    .arg(&message)
                    .query_async(&mut conn)
                    .await?;
                Ok(())
            }
        })
        .await
    }

    async fn health(&self) -> HealthReport {
        let mut endpoints = Vec::with_capacity(self.pool.len());
        for (idx, stats) in self.pool.stats().into_iter().enumerate() {
            let (_, conn) = self.pool.acquire_slot(idx).await;
            let started = Instant::now();
            let ok = ping(conn, self.sync_timeout).await;
            endpoints.push(EndpointHealth {
                endpoint: stats.endpoint,
                ok,
                latency: started.elapsed(),
                success_rate: stats.success_rate,
            });
        }
        HealthReport { endpoints }
    }
}

async fn ping(mut conn: ConnectionManager, timeout: Duration) -> bool {
    let fut = async move {
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        redis::RedisResult::Ok(pong)
    };
    matches!(tokio::time::timeout(timeout, fut).await, Ok(Ok(_)))
}

/// Resolve key types, then fetch strings with GET and hashes with HGETALL,
/// decoding into tagged values. Missing keys decode to `Unavailable`.
async fn fetch_keys(
    conn: &mut ConnectionManager,
    keys: &[String],
    values: &mut HashMap<String, TaggedValue>,
) -> redis::RedisResult<()> {
    if keys.is_empty() {
        return Ok(());
    }
    let mut type_pipe = redis::pipe();
    for key in keys {
        type_pipe.cmd("TYPE").arg(key);
    }
    let types: Vec<String> = type_pipe.query_async(conn).await?;

    let mut fetch = redis::pipe();
    let mut pending: Vec<(String, KeyKind)> = Vec::new();
    for (key, ty) in keys.iter().zip(&types) {
        match ty.as_str() {
            "string" => {
                fetch.cmd("GET").arg(key);
                pending.push((key.clone(), KeyKind::Scalar));
            }
            "hash" => {
                fetch.cmd("HGETALL").arg(key);
                pending.push((key.clone(), KeyKind::Hash));
            }
            _ => {
                values.insert(key.clone(), TaggedValue::Unavailable);
            }
        }
    }
    if pending.is_empty() {
        return Ok(());
    }
    let raw: Vec<redis::Value> = fetch.query_async(conn).await?;
    for ((key, kind), value) in pending.into_iter().zip(raw) {
        let decoded = match kind {
            KeyKind::Scalar => redis::from_redis_value::<Option<String>>(&value)
                .ok()
                .flatten()
                .map(|s| decode_wire(&s))
                .unwrap_or(TaggedValue::Unavailable),
            KeyKind::Hash => redis::from_redis_value::<HashMap<String, String>>(&value)
                .ok()
                .map(|m| decode_hash(&m))
                .unwrap_or(TaggedValue::Unavailable),
        };
        values.insert(key, decoded);
    }
    Ok(())
}

enum KeyKind {
    Scalar,
    Hash,
}

fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
