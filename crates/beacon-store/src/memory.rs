//! In-process [`StoreBackend`] for tests and local runs.
//!
//! Stores the same wire representations a Redis server would hold, so the
//! codec paths are exercised end to end. Optional failure injection lets
//! scheduler tests drive the degraded paths.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use orion_error::prelude::*;

use beacon_core::value::{decode_wire, encode_wire};
use beacon_core::{CycleSnapshot, TaggedValue};

use crate::backend::{EndpointHealth, HealthReport, StoreBackend, WriteBatch};
use crate::codec::{buffer_key, format_buffer_entry};
use crate::error::{StoreReason, StoreResult};

#[derive(Debug, Clone)]
enum Entry {
    Scalar(String),
    List(Vec<String>),
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    published: Mutex<Vec<(String, String)>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw wire string, as an external writer would.
    pub fn set_raw(&self, key: &str, raw: &str) {
        self.entries
            .lock()
            .expect("memory store lock poisoned")
            .insert(key.to_string(), Entry::Scalar(raw.to_string()));
    }

    pub fn remove(&self, key: &str) {
        self.entries
            .lock()
            .expect("memory store lock poisoned")
            .remove(key);
    }

    pub fn get_raw(&self, key: &str) -> Option<String> {
        match self
            .entries
            .lock()
            .expect("memory store lock poisoned")
            .get(key)
        {
            Some(Entry::Scalar(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn get_list(&self, key: &str) -> Vec<String> {
        match self
            .entries
            .lock()
            .expect("memory store lock poisoned")
            .get(key)
        {
            Some(Entry::List(items)) => items.clone(),
            _ => Vec::new(),
        }
    }

    /// Messages published so far, in dispatch order.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published
            .lock()
            .expect("memory store lock poisoned")
            .clone()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    fn check(&self, flag: &AtomicBool, what: &str) -> StoreResult<()> {
        if flag.load(Ordering::Relaxed) {
            return StructError::from(StoreReason::Failure)
                .with_detail(format!("injected {what} failure"))
                .err();
        }
        Ok(())
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    async fn snapshot_inputs(&self, prefixes: &[String]) -> StoreResult<CycleSnapshot> {
        self.check(&self.fail_reads, "read")?;
        let entries = self.entries.lock().expect("memory store lock poisoned");
        let values = entries
            .iter()
            .filter(|(k, _)| prefixes.iter().any(|p| k.starts_with(p.as_str())))
            .filter_map(|(k, e)| match e {
                Entry::Scalar(raw) => Some((k.clone(), decode_wire(raw))),
                Entry::List(_) => None,
            })
            .collect();
        Ok(CycleSnapshot {
            values,
            at_ms: epoch_ms(),
        })
    }

    async fn read_value(&self, key: &str) -> StoreResult<TaggedValue> {
        self.check(&self.fail_reads, "read")?;
        Ok(self
            .get_raw(key)
            .map(|raw| decode_wire(&raw))
            .unwrap_or(TaggedValue::Unavailable))
    }

    async fn write_batch(&self, batch: &WriteBatch, _deadline: Option<Instant>) -> StoreResult<()> {
        self.check(&self.fail_writes, "write")?;
        let mut entries = self.entries.lock().expect("memory store lock poisoned");
        for (key, value) in &batch.sets {
            entries.insert(key.clone(), Entry::Scalar(encode_wire(value)));
        }
        for append in &batch.buffers {
            let key = buffer_key(&append.key);
            let entry = entries.entry(key).or_insert_with(|| Entry::List(Vec::new()));
            if !matches!(entry, Entry::List(_)) {
                *entry = Entry::List(Vec::new());
            }
            if let Entry::List(items) = entry {
                items.push(format_buffer_entry(append.ts_ms, &append.value));
                if items.len() > append.max_items {
                    let excess = items.len() - append.max_items;
                    items.drain(..excess);
                }
            }
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> StoreResult<()> {
        self.check(&self.fail_writes, "publish")?;
        self.published
            .lock()
            .expect("memory store lock poisoned")
            .push((channel.to_string(), message.to_string()));
        Ok(())
    }

    async fn health(&self) -> HealthReport {
        HealthReport {
            endpoints: vec![EndpointHealth {
                endpoint: "memory".to_string(),
                ok: !self.fail_reads.load(Ordering::Relaxed),
                latency: Duration::ZERO,
                success_rate: 1.0,
            }],
        }
    }
}

fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BufferAppend;

    #[tokio::test]
    async fn snapshot_decodes_under_prefixes() {
        let store = MemoryStore::new();
        store.set_raw("input:temperature", "21.5");
        store.set_raw("input:switch", "true");
        store.set_raw("state:ignored", "1");

        let snap = store
            .snapshot_inputs(&["input:".to_string(), "output:".to_string()])
            .await
            .unwrap();
        assert_eq!(
            snap.values.get("input:temperature"),
            Some(&TaggedValue::Number(21.5))
        );
        assert_eq!(
            snap.values.get("input:switch"),
            Some(&TaggedValue::Bool(true))
        );
        assert!(!snap.values.contains_key("state:ignored"));
    }

    #[tokio::test]
    async fn write_batch_persists_wire_format() {
        let store = MemoryStore::new();
        let batch = WriteBatch {
            sets: vec![
                ("output:flag".to_string(), TaggedValue::Bool(true)),
                ("output:level".to_string(), TaggedValue::Number(0.3)),
            ],
            buffers: vec![BufferAppend {
                key: "output:series".to_string(),
                value: TaggedValue::Number(1.0),
                ts_ms: 42,
                max_items: 2,
            }],
        };
        store.write_batch(&batch, None).await.unwrap();
        assert_eq!(store.get_raw("output:flag").as_deref(), Some("true"));
        assert_eq!(store.get_raw("output:level").as_deref(), Some("0.3"));
        assert_eq!(store.get_list("buffer:output:series"), vec!["42:1"]);
    }

    #[tokio::test]
    async fn buffer_lists_trim_to_max_items() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let batch = WriteBatch {
                sets: vec![],
                buffers: vec![BufferAppend {
                    key: "s".to_string(),
                    value: TaggedValue::Number(i as f64),
                    ts_ms: i,
                    max_items: 3,
                }],
            };
            store.write_batch(&batch, None).await.unwrap();
        }
        assert_eq!(store.get_list("buffer:s"), vec!["2:2", "3:3", "4:4"]);
    }

    #[tokio::test]
    async fn injected_failures_surface_as_store_errors() {
        let store = MemoryStore::new();
        store.set_fail_reads(true);
        assert!(store.snapshot_inputs(&["input:".to_string()]).await.is_err());
        store.set_fail_reads(false);
        assert!(store.snapshot_inputs(&["input:".to_string()]).await.is_ok());
    }

    #[tokio::test]
    async fn publish_records_in_order() {
        let store = MemoryStore::new();
        store.publish("alerts", "one").await.unwrap();
        store.publish("alerts", "two").await.unwrap();
        assert_eq!(
            store.published(),
            vec![
                ("alerts".to_string(), "one".to_string()),
                ("alerts".to_string(), "two".to_string()),
            ]
        );
    }
}
