//! Per-sensor temporal ring buffers backing `threshold_over_time` and
//! `use_last_known` fallbacks.
//!
//! Each ring holds `(timestamp, value)` samples with timestamps
//! monotonically non-decreasing; appending evicts the oldest entry when the
//! ring is full. Readers run concurrently; the writer is exclusive.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::Duration;

use beacon_lang::ast::CmpOp;
use beacon_lang::plan::BufferSpec;

use crate::expr::compare_f64;
use crate::tri::Tri;
use crate::value::TaggedValue;

/// How a window query interprets gaps between samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMode {
    /// Only explicit samples participate.
    Strict,
    /// Each sample extends forward until the next sample or `now`.
    ExtendedLastKnown,
}

#[derive(Debug, Clone)]
struct Sample {
    ts_ms: i64,
    value: TaggedValue,
}

#[derive(Debug)]
struct SensorRing {
    capacity: usize,
    entries: VecDeque<Sample>,
}

impl SensorRing {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    fn append(&mut self, value: TaggedValue, ts_ms: i64) {
        // Out-of-order samples would break window queries; drop them.
        if let Some(last) = self.entries.back()
            && ts_ms < last.ts_ms
        {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(Sample { ts_ms, value });
    }
}

/// Process-wide cache of recent sensor values.
///
/// Rings named in `specs` get their compiled capacity; any other sensor
/// gets `default_capacity` on first append.
pub struct TemporalBuffer {
    rings: RwLock<HashMap<String, SensorRing>>,
    default_capacity: usize,
}

impl TemporalBuffer {
    pub fn new(specs: &[BufferSpec], default_capacity: usize) -> Self {
        let rings = specs
            .iter()
            .map(|s| (s.sensor.clone(), SensorRing::new(s.capacity)))
            .collect();
        Self {
            rings: RwLock::new(rings),
            default_capacity: default_capacity.max(1),
        }
    }

    /// Append one sample. Unavailable values are not recorded; a gap is
    /// what the window modes are for.
    pub fn append(&self, sensor: &str, value: TaggedValue, ts_ms: i64) {
        if !value.is_available() {
            return;
        }
        let mut rings = self.rings.write().expect("temporal buffer lock poisoned");
        let ring = rings
            .entry(sensor.to_string())
            .or_insert_with(|| SensorRing::new(self.default_capacity));
        ring.append(value, ts_ms);
    }

    /// Samples with timestamps in `[now - duration, now]`, chronological.
    pub fn window(&self, sensor: &str, duration: Duration, now_ms: i64) -> Vec<(i64, TaggedValue)> {
        let start = now_ms - duration.as_millis() as i64;
        let rings = self.rings.read().expect("temporal buffer lock poisoned");
        let Some(ring) = rings.get(sensor) else {
            return Vec::new();
        };
        ring.entries
            .iter()
            .filter(|s| s.ts_ms >= start && s.ts_ms <= now_ms)
            .map(|s| (s.ts_ms, s.value.clone()))
            .collect()
    }

    /// Most recent sample no older than `max_age`, if any.
    pub fn last_within(&self, sensor: &str, max_age: Duration, now_ms: i64) -> Option<TaggedValue> {
        let cutoff = now_ms - max_age.as_millis() as i64;
        let rings = self.rings.read().expect("temporal buffer lock poisoned");
        rings.get(sensor).and_then(|ring| {
            ring.entries
                .iter()
                .rev()
                .find(|s| s.ts_ms >= cutoff && s.ts_ms <= now_ms)
                .map(|s| s.value.clone())
        })
    }

    /// Does `sensor op threshold` hold over every instant of the window?
    ///
    /// `False` as soon as any sample in effect violates the comparison;
    /// `Indeterminate` when the window has no data (Strict) or is not fully
    /// covered (ExtendedLastKnown), or when a non-numeric sample prevents
    /// the comparison.
    pub fn satisfies_threshold_for(
        &self,
        sensor: &str,
        op: CmpOp,
        threshold: f64,
        duration: Duration,
        mode: WindowMode,
        now_ms: i64,
    ) -> Tri {
        let start = now_ms - duration.as_millis() as i64;
        let rings = self.rings.read().expect("temporal buffer lock poisoned");
        let Some(ring) = rings.get(sensor) else {
            return Tri::Indeterminate;
        };

        // Samples in effect over the window. Extended mode additionally
        // carries the last sample at or before the window start, which
        // holds its value into the head of the window.
        let mut in_effect: Vec<&Sample> = Vec::new();
        let mut head_covered = true;
        match mode {
            WindowMode::Strict => {
                in_effect.extend(
                    ring.entries
                        .iter()
                        .filter(|s| s.ts_ms >= start && s.ts_ms <= now_ms),
                );
            }
            WindowMode::ExtendedLastKnown => {
                match ring.entries.iter().rev().find(|s| s.ts_ms <= start) {
                    Some(head) => in_effect.push(head),
                    None => head_covered = false,
                }
                in_effect.extend(
                    ring.entries
                        .iter()
                        .filter(|s| s.ts_ms > start && s.ts_ms <= now_ms),
                );
            }
        }

        if in_effect.is_empty() {
            return Tri::Indeterminate;
        }

        let mut indeterminate = false;
        for sample in &in_effect {
            match sample.value.as_number() {
                Some(n) => {
                    if compare_f64(op, n, threshold) == Tri::False {
                        return Tri::False;
                    }
                }
                None => indeterminate = true,
            }
        }
        if indeterminate {
            return Tri::Indeterminate;
        }
        if mode == WindowMode::ExtendedLastKnown && !head_covered {
            // Samples exist but the head of the window is uncovered.
            return Tri::Indeterminate;
        }
        Tri::True
    }

    /// Number of sensors currently tracked.
    pub fn sensor_count(&self) -> usize {
        self.rings.read().expect("temporal buffer lock poisoned").len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_with(capacity: usize) -> TemporalBuffer {
        TemporalBuffer::new(&[], capacity)
    }

    fn push_series(buf: &TemporalBuffer, sensor: &str, values: &[(i64, f64)]) {
        for (ts, v) in values {
            buf.append(sensor, TaggedValue::Number(*v), *ts);
        }
    }

    #[test]
    fn append_evicts_oldest_when_full() {
        let buf = buffer_with(3);
        push_series(&buf, "s", &[(1, 1.0), (2, 2.0), (3, 3.0), (4, 4.0)]);
        let window = buf.window("s", Duration::from_millis(100), 4);
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].0, 2);
        assert_eq!(window[2].0, 4);
    }

    #[test]
    fn out_of_order_samples_are_dropped() {
        let buf = buffer_with(8);
        push_series(&buf, "s", &[(10, 1.0), (5, 2.0), (10, 3.0)]);
        let window = buf.window("s", Duration::from_millis(100), 20);
        assert_eq!(
            window.iter().map(|(ts, _)| *ts).collect::<Vec<_>>(),
            vec![10, 10]
        );
    }

    #[test]
    fn strict_true_when_all_samples_satisfy() {
        let buf = buffer_with(16);
        push_series(&buf, "t", &[(1_000, 76.0), (2_000, 77.0), (3_000, 78.0)]);
        let got = buf.satisfies_threshold_for(
            "t",
            CmpOp::Gt,
            75.0,
            Duration::from_secs(10),
            WindowMode::Strict,
            3_000,
        );
        assert_eq!(got, Tri::True);
    }

    #[test]
    fn strict_false_on_any_violating_sample() {
        let buf = buffer_with(16);
        push_series(&buf, "t", &[(1_000, 76.0), (2_000, 74.0), (3_000, 78.0)]);
        let got = buf.satisfies_threshold_for(
            "t",
            CmpOp::Gt,
            75.0,
            Duration::from_secs(10),
            WindowMode::Strict,
            3_000,
        );
        assert_eq!(got, Tri::False);
    }

    #[test]
    fn strict_indeterminate_on_empty_window() {
        let buf = buffer_with(16);
        push_series(&buf, "t", &[(1_000, 76.0)]);
        let got = buf.satisfies_threshold_for(
            "t",
            CmpOp::Gt,
            75.0,
            Duration::from_secs(2),
            WindowMode::Strict,
            10_000,
        );
        assert_eq!(got, Tri::Indeterminate);
        assert_eq!(
            buf.satisfies_threshold_for(
                "unknown",
                CmpOp::Gt,
                0.0,
                Duration::from_secs(1),
                WindowMode::Strict,
                0,
            ),
            Tri::Indeterminate
        );
    }

    #[test]
    fn strict_single_satisfying_sample_is_true() {
        // Window of exactly one cycle: one satisfying sample suffices.
        let buf = buffer_with(16);
        push_series(&buf, "t", &[(1_000, 80.0)]);
        let got = buf.satisfies_threshold_for(
            "t",
            CmpOp::Gt,
            75.0,
            Duration::from_millis(100),
            WindowMode::Strict,
            1_000,
        );
        assert_eq!(got, Tri::True);
    }

    #[test]
    fn extended_head_sample_covers_window_start() {
        let buf = buffer_with(16);
        // Sample before the window start holds its value into the window.
        push_series(&buf, "t", &[(500, 80.0), (9_000, 81.0)]);
        let got = buf.satisfies_threshold_for(
            "t",
            CmpOp::Gt,
            75.0,
            Duration::from_secs(5),
            WindowMode::ExtendedLastKnown,
            10_000,
        );
        assert_eq!(got, Tri::True);
    }

    #[test]
    fn extended_uncovered_head_is_indeterminate() {
        let buf = buffer_with(16);
        // First-ever sample lands mid-window; the head is a gap.
        push_series(&buf, "t", &[(8_000, 80.0)]);
        let got = buf.satisfies_threshold_for(
            "t",
            CmpOp::Gt,
            75.0,
            Duration::from_secs(5),
            WindowMode::ExtendedLastKnown,
            10_000,
        );
        assert_eq!(got, Tri::Indeterminate);
    }

    #[test]
    fn extended_violating_head_is_false() {
        let buf = buffer_with(16);
        push_series(&buf, "t", &[(500, 60.0), (9_000, 81.0)]);
        let got = buf.satisfies_threshold_for(
            "t",
            CmpOp::Gt,
            75.0,
            Duration::from_secs(5),
            WindowMode::ExtendedLastKnown,
            10_000,
        );
        assert_eq!(got, Tri::False);
    }

    #[test]
    fn capacity_one_keeps_only_latest() {
        let buf = buffer_with(1);
        push_series(&buf, "t", &[(1_000, 74.0), (2_000, 80.0)]);
        let got = buf.satisfies_threshold_for(
            "t",
            CmpOp::Gt,
            75.0,
            Duration::from_secs(10),
            WindowMode::Strict,
            2_000,
        );
        assert_eq!(got, Tri::True);
    }

    #[test]
    fn non_numeric_sample_blocks_a_true_verdict() {
        let buf = buffer_with(16);
        buf.append("t", TaggedValue::Number(80.0), 1_000);
        buf.append("t", TaggedValue::Str("glitch".to_string()), 2_000);
        let got = buf.satisfies_threshold_for(
            "t",
            CmpOp::Gt,
            75.0,
            Duration::from_secs(10),
            WindowMode::Strict,
            2_000,
        );
        assert_eq!(got, Tri::Indeterminate);
    }

    #[test]
    fn last_within_respects_max_age() {
        let buf = buffer_with(16);
        push_series(&buf, "s", &[(1_000, 5.0)]);
        assert_eq!(
            buf.last_within("s", Duration::from_secs(2), 2_500),
            Some(TaggedValue::Number(5.0))
        );
        assert_eq!(buf.last_within("s", Duration::from_secs(1), 5_000), None);
    }

    #[test]
    fn compiled_specs_set_ring_capacity() {
        let buf = TemporalBuffer::new(
            &[BufferSpec {
                sensor: "t".to_string(),
                capacity: 2,
                max_window: Duration::from_secs(1),
            }],
            100,
        );
        push_series(&buf, "t", &[(1, 1.0), (2, 2.0), (3, 3.0)]);
        assert_eq!(buf.window("t", Duration::from_secs(1), 3).len(), 2);
    }
}
