//! Connection pool over `redis::aio::ConnectionManager`.
//!
//! Slots are distributed round-robin across the configured endpoints.
//! Selection prefers healthy slots; when none are healthy the pool hands
//! out the next slot anyway (the manager reconnects internally) and kicks
//! off a best-effort rebuild of that slot's connection.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use orion_error::prelude::*;
use orion_error::ErrorOweBase;
use redis::aio::ConnectionManager;
use tokio::sync::Mutex;

use beacon_config::RedisConfig;

use crate::error::{StoreReason, StoreResult};

struct Slot {
    endpoint: String,
    client: redis::Client,
    manager: Mutex<ConnectionManager>,
    healthy: AtomicBool,
    consecutive_failures: AtomicU32,
    ops_total: AtomicU64,
    errs_total: AtomicU64,
}

pub struct ConnectionPool {
    slots: Vec<Slot>,
    next: AtomicUsize,
    connect_timeout: Duration,
}

/// Point-in-time view of one slot, for health reports and metrics.
#[derive(Debug, Clone)]
pub struct SlotStats {
    pub endpoint: String,
    pub healthy: bool,
    pub success_rate: f64,
}

impl ConnectionPool {
    /// Open `pool_size` connections, spread over the endpoints.
    pub async fn connect(cfg: &RedisConfig) -> StoreResult<Self> {
        let connect_timeout = Duration::from_millis(cfg.connect_timeout_ms);
        let mut slots = Vec::with_capacity(cfg.pool_size);
        for i in 0..cfg.pool_size {
            let endpoint = &cfg.endpoints[i % cfg.endpoints.len()];
            let url = redis_url(endpoint, cfg);
            let client = redis::Client::open(url.as_str())
                .owe(StoreReason::Pool)
                .position(endpoint.clone())?;
            let manager = open_manager(&client, connect_timeout)
                .await
                .position(endpoint.clone())?;
            slots.push(Slot {
                endpoint: endpoint.clone(),
                client,
                manager: Mutex::new(manager),
                healthy: AtomicBool::new(true),
                consecutive_failures: AtomicU32::new(0),
                ops_total: AtomicU64::new(0),
                errs_total: AtomicU64::new(0),
            });
        }
        Ok(Self {
            slots,
            next: AtomicUsize::new(0),
            connect_timeout,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Pick a slot round-robin, preferring healthy ones, and clone its
    /// manager. Cloning is cheap; the manager multiplexes internally.
    pub async fn acquire(&self) -> (usize, ConnectionManager) {
        let start = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let mut chosen = start;
        for offset in 0..self.slots.len() {
            let idx = (start + offset) % self.slots.len();
            if self.slots[idx].healthy.load(Ordering::Relaxed) {
                chosen = idx;
                break;
            }
        }
        if !self.slots[chosen].healthy.load(Ordering::Relaxed) {
            // Every slot is unhealthy; try to revive the one we hand out.
            self.reconnect_slot(chosen).await;
        }
        let manager = self.slots[chosen].manager.lock().await.clone();
        (chosen, manager)
    }

    pub fn record_success(&self, idx: usize) {
        let slot = &self.slots[idx];
        slot.ops_total.fetch_add(1, Ordering::Relaxed);
        slot.consecutive_failures.store(0, Ordering::Relaxed);
        slot.healthy.store(true, Ordering::Relaxed);
    }

    /// Record a failed operation; past `threshold` consecutive failures the
    /// slot is marked unhealthy.
    pub fn record_failure(&self, idx: usize, threshold: u32) {
        let slot = &self.slots[idx];
        slot.ops_total.fetch_add(1, Ordering::Relaxed);
        slot.errs_total.fetch_add(1, Ordering::Relaxed);
        let failures = slot.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= threshold {
            slot.healthy.store(false, Ordering::Relaxed);
        }
    }

    /// Rebuild a slot's manager from its client. Returns whether the
    /// rebuild succeeded; failure leaves the old manager in place.
    pub async fn reconnect_slot(&self, idx: usize) -> bool {
        let slot = &self.slots[idx];
        match open_manager(&slot.client, self.connect_timeout).await {
            Ok(manager) => {
                *slot.manager.lock().await = manager;
                slot.healthy.store(true, Ordering::Relaxed);
                slot.consecutive_failures.store(0, Ordering::Relaxed);
                true
            }
            Err(_) => false,
        }
    }

    /// Clone a specific slot's manager (health probes address slots
    /// directly rather than round-robin).
    pub async fn acquire_slot(&self, idx: usize) -> (usize, ConnectionManager) {
        let manager = self.slots[idx].manager.lock().await.clone();
        (idx, manager)
    }

    pub fn endpoint(&self, idx: usize) -> &str {
        &self.slots[idx].endpoint
    }

    /// Number of slots currently marked healthy.
    pub fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.healthy.load(Ordering::Relaxed))
            .count()
    }

    pub fn stats(&self) -> Vec<SlotStats> {
        self.slots
            .iter()
            .map(|s| {
                let ops = s.ops_total.load(Ordering::Relaxed);
                let errs = s.errs_total.load(Ordering::Relaxed);
                SlotStats {
                    endpoint: s.endpoint.clone(),
                    healthy: s.healthy.load(Ordering::Relaxed),
                    success_rate: if ops == 0 {
                        1.0
                    } else {
                        (ops - errs) as f64 / ops as f64
                    },
                }
            })
            .collect()
    }

    /// A client handle for auxiliary connections (pub/sub).
    pub fn any_client(&self) -> redis::Client {
        self.slots[0].client.clone()
    }
}

async fn open_manager(
    client: &redis::Client,
    connect_timeout: Duration,
) -> StoreResult<ConnectionManager> {
    match tokio::time::timeout(connect_timeout, ConnectionManager::new(client.clone())).await {
        Ok(result) => result.owe(StoreReason::Pool),
        Err(_) => StructError::from(StoreReason::Pool)
            .with_detail(format!("connect timed out after {connect_timeout:?}"))
            .err(),
    }
}

fn redis_url(endpoint: &str, cfg: &RedisConfig) -> String {
    let scheme = if cfg.ssl { "rediss" } else { "redis" };
    match &cfg.password {
        Some(password) => format!("{scheme}://:{password}@{endpoint}/"),
        None => format!("{scheme}://{endpoint}/"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg() -> RedisConfig {
        toml::from_str(r#"endpoints = ["127.0.0.1:6379", "127.0.0.1:6380"]"#).unwrap()
    }

    #[test]
    fn url_construction() {
        let mut cfg = test_cfg();
        assert_eq!(redis_url("h:1", &cfg), "redis://h:1/");
        cfg.ssl = true;
        cfg.password = Some("secret".to_string());
        assert_eq!(redis_url("h:1", &cfg), "rediss://:secret@h:1/");
    }
}
