use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use beacon_config::MetricsConfig;
use beacon_core::eval::EvalReport;
use beacon_lang::plan::{CondPlan, GroupPlan, RulePlan};
use beacon_store::RedisStore;

const STORE_OPS: &[&str] = &["snapshot", "write", "publish"];

/// Histogram bucket upper bounds in seconds.
const BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0];

// ---------------------------------------------------------------------------
// Histogram — fixed-bucket, lock-free
// ---------------------------------------------------------------------------

struct Histogram {
    counts: Vec<AtomicU64>,
    sum_micros: AtomicU64,
    total: AtomicU64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            counts: (0..=BUCKETS.len()).map(|_| AtomicU64::new(0)).collect(),
            sum_micros: AtomicU64::new(0),
            total: AtomicU64::new(0),
        }
    }

    fn observe(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let idx = BUCKETS
            .iter()
            .position(|b| secs <= *b)
            .unwrap_or(BUCKETS.len());
        self.counts[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    fn render(&self, out: &mut String, name: &str, labels: &str) {
        let mut cumulative = 0u64;
        for (idx, bound) in BUCKETS.iter().enumerate() {
            cumulative += self.counts[idx].load(Ordering::Relaxed);
            let _ = writeln!(out, "{name}_bucket{{{labels}le=\"{bound}\"}} {cumulative}");
        }
        cumulative += self.counts[BUCKETS.len()].load(Ordering::Relaxed);
        let _ = writeln!(out, "{name}_bucket{{{labels}le=\"+Inf\"}} {cumulative}");
        let sum = self.sum_micros.load(Ordering::Relaxed) as f64 / 1e6;
        let _ = writeln!(out, "{name}_sum{{{labels_trim}}} {sum}", labels_trim = labels.trim_end_matches(','));
        let _ = writeln!(
            out,
            "{name}_count{{{labels_trim}}} {}",
            self.total.load(Ordering::Relaxed),
            labels_trim = labels.trim_end_matches(',')
        );
    }
}

// ---------------------------------------------------------------------------
// EngineMetrics
// ---------------------------------------------------------------------------

/// Shared engine metrics. Counters are lock-free atomics; label sets
/// (rules, output keys, temporal sensors) are fixed at startup so hot-path
/// updates stay allocation-free.
pub struct EngineMetrics {
    cycles_total: AtomicU64,
    cycle_time_ms: AtomicU64,
    cycle_delay_ms: AtomicU64,
    cycle_overruns_total: AtomicU64,
    cycle_errors_total: AtomicU64,
    commit_failures_total: AtomicU64,
    expr_errors_total: AtomicU64,
    write_conflicts_total: AtomicU64,
    redis_connections_active: AtomicU64,

    /// rule → [true, false, indeterminate] counts.
    rule_results: BTreeMap<String, [AtomicU64; 3]>,
    rule_durations: BTreeMap<String, Histogram>,
    output_events: BTreeMap<String, AtomicU64>,
    /// (rule, sensor) → 0/1 for every temporal condition.
    window_state: BTreeMap<(String, String), AtomicU64>,
    store_ops: BTreeMap<&'static str, AtomicU64>,
    store_errors: BTreeMap<&'static str, AtomicU64>,
    store_durations: BTreeMap<&'static str, Histogram>,
}

impl EngineMetrics {
    pub fn new(plan: &RulePlan) -> Self {
        let rule_names = plan.rule_names();
        Self {
            cycles_total: AtomicU64::new(0),
            cycle_time_ms: AtomicU64::new(0),
            cycle_delay_ms: AtomicU64::new(0),
            cycle_overruns_total: AtomicU64::new(0),
            cycle_errors_total: AtomicU64::new(0),
            commit_failures_total: AtomicU64::new(0),
            expr_errors_total: AtomicU64::new(0),
            write_conflicts_total: AtomicU64::new(0),
            redis_connections_active: AtomicU64::new(0),
            rule_results: rule_names
                .iter()
                .map(|n| (n.clone(), [0, 0, 0].map(AtomicU64::new)))
                .collect(),
            rule_durations: rule_names
                .iter()
                .map(|n| (n.clone(), Histogram::new()))
                .collect(),
            output_events: plan
                .output_keys()
                .into_iter()
                .map(|k| (k, AtomicU64::new(0)))
                .collect(),
            window_state: temporal_pairs(plan)
                .into_iter()
                .map(|p| (p, AtomicU64::new(0)))
                .collect(),
            store_ops: STORE_OPS.iter().map(|op| (*op, AtomicU64::new(0))).collect(),
            store_errors: STORE_OPS.iter().map(|op| (*op, AtomicU64::new(0))).collect(),
            store_durations: STORE_OPS.iter().map(|op| (*op, Histogram::new())).collect(),
        }
    }

    pub fn observe_cycle(&self, elapsed: Duration, delay: Duration) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        self.cycle_time_ms
            .store(elapsed.as_millis() as u64, Ordering::Relaxed);
        self.cycle_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn inc_overrun(&self) {
        self.cycle_overruns_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cycle_error(&self) {
        self.cycle_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_commit_failure(&self) {
        self.commit_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_report(&self, report: &EvalReport) {
        for (rule, result) in &report.results {
            if let Some(slots) = self.rule_results.get(rule) {
                let idx = match result {
                    beacon_core::Tri::True => 0,
                    beacon_core::Tri::False => 1,
                    beacon_core::Tri::Indeterminate => 2,
                };
                slots[idx].fetch_add(1, Ordering::Relaxed);
            }
        }
        for (rule, elapsed) in &report.durations {
            if let Some(h) = self.rule_durations.get(rule) {
                h.observe(*elapsed);
            }
        }
        for (rule, sensor, satisfied) in &report.window_states {
            if let Some(v) = self.window_state.get(&(rule.clone(), sensor.clone())) {
                v.store(u64::from(*satisfied), Ordering::Relaxed);
            }
        }
        self.expr_errors_total
            .fetch_add(report.expr_errors, Ordering::Relaxed);
        self.write_conflicts_total
            .fetch_add(report.write_conflicts, Ordering::Relaxed);
    }

    pub fn record_output(&self, key: &str) {
        if let Some(v) = self.output_events.get(key) {
            v.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_store_op(&self, op: &'static str, elapsed: Duration, ok: bool) {
        if let Some(v) = self.store_ops.get(op) {
            v.fetch_add(1, Ordering::Relaxed);
        }
        if !ok && let Some(v) = self.store_errors.get(op) {
            v.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(h) = self.store_durations.get(op) {
            h.observe(elapsed);
        }
    }

    pub fn set_connections_active(&self, n: usize) {
        self.redis_connections_active
            .store(n as u64, Ordering::Relaxed);
    }

    fn render_prometheus(&self) -> String {
        let mut out = String::with_capacity(16 * 1024);

        render_gauge(&mut out, "beacon_cycle_time_ms", self.cycle_time_ms.load(Ordering::Relaxed));
        render_gauge(&mut out, "beacon_cycle_delay_ms", self.cycle_delay_ms.load(Ordering::Relaxed));
        render_counter(&mut out, "beacon_cycles_total", self.cycles_total.load(Ordering::Relaxed));
        render_counter(
            &mut out,
            "beacon_cycle_overruns_total",
            self.cycle_overruns_total.load(Ordering::Relaxed),
        );
        render_counter(
            &mut out,
            "beacon_cycle_errors_total",
            self.cycle_errors_total.load(Ordering::Relaxed),
        );
        render_counter(
            &mut out,
            "beacon_commit_failures_total",
            self.commit_failures_total.load(Ordering::Relaxed),
        );
        render_counter(
            &mut out,
            "beacon_expression_errors_total",
            self.expr_errors_total.load(Ordering::Relaxed),
        );
        render_counter(
            &mut out,
            "beacon_write_conflicts_total",
            self.write_conflicts_total.load(Ordering::Relaxed),
        );
        render_gauge(
            &mut out,
            "beacon_redis_connections_active",
            self.redis_connections_active.load(Ordering::Relaxed),
        );

        let _ = writeln!(out, "# TYPE beacon_rule_evaluations_total counter");
        for (rule, slots) in &self.rule_results {
            for (idx, result) in ["true", "false", "indeterminate"].iter().enumerate() {
                let _ = writeln!(
                    out,
                    "beacon_rule_evaluations_total{{rule=\"{rule}\",result=\"{result}\"}} {}",
                    slots[idx].load(Ordering::Relaxed)
                );
            }
        }
        let _ = writeln!(out, "# TYPE beacon_rule_indeterminate_total counter");
        for (rule, slots) in &self.rule_results {
            let _ = writeln!(
                out,
                "beacon_rule_indeterminate_total{{rule=\"{rule}\"}} {}",
                slots[2].load(Ordering::Relaxed)
            );
        }

        let _ = writeln!(out, "# TYPE beacon_rule_execution_duration_seconds histogram");
        for (rule, h) in &self.rule_durations {
            h.render(
                &mut out,
                "beacon_rule_execution_duration_seconds",
                &format!("rule=\"{rule}\","),
            );
        }

        let _ = writeln!(out, "# TYPE beacon_output_events_total counter");
        for (key, v) in &self.output_events {
            let _ = writeln!(
                out,
                "beacon_output_events_total{{key=\"{key}\"}} {}",
                v.load(Ordering::Relaxed)
            );
        }

        let _ = writeln!(out, "# TYPE beacon_window_tracker_state gauge");
        for ((rule, sensor), v) in &self.window_state {
            let _ = writeln!(
                out,
                "beacon_window_tracker_state{{rule=\"{rule}\",sensor=\"{sensor}\"}} {}",
                v.load(Ordering::Relaxed)
            );
        }

        let _ = writeln!(out, "# TYPE beacon_redis_operations_total counter");
        for (op, v) in &self.store_ops {
            let _ = writeln!(
                out,
                "beacon_redis_operations_total{{op=\"{op}\"}} {}",
                v.load(Ordering::Relaxed)
            );
        }
        let _ = writeln!(out, "# TYPE beacon_redis_operation_errors_total counter");
        for (op, v) in &self.store_errors {
            let _ = writeln!(
                out,
                "beacon_redis_operation_errors_total{{op=\"{op}\"}} {}",
                v.load(Ordering::Relaxed)
            );
        }
        let _ = writeln!(out, "# TYPE beacon_redis_operation_duration_seconds histogram");
        for (op, h) in &self.store_durations {
            h.render(
                &mut out,
                "beacon_redis_operation_duration_seconds",
                &format!("op=\"{op}\","),
            );
        }

        out
    }

    fn summary_line(&self) -> String {
        let fired: u64 = self
            .rule_results
            .values()
            .map(|s| s[0].load(Ordering::Relaxed))
            .sum();
        let indeterminate: u64 = self
            .rule_results
            .values()
            .map(|s| s[2].load(Ordering::Relaxed))
            .sum();
        format!(
            "cycles={} cycle_ms={} overruns={} fired={} indeterminate={} commit_failures={}",
            self.cycles_total.load(Ordering::Relaxed),
            self.cycle_time_ms.load(Ordering::Relaxed),
            self.cycle_overruns_total.load(Ordering::Relaxed),
            fired,
            indeterminate,
            self.commit_failures_total.load(Ordering::Relaxed),
        )
    }
}

fn render_counter(out: &mut String, name: &str, value: u64) {
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {value}");
}

fn render_gauge(out: &mut String, name: &str, value: u64) {
    let _ = writeln!(out, "# TYPE {name} gauge");
    let _ = writeln!(out, "{name} {value}");
}

/// All `(rule, sensor)` pairs carrying a temporal condition.
fn temporal_pairs(plan: &RulePlan) -> Vec<(String, String)> {
    fn walk(group: &GroupPlan, rule: &str, out: &mut Vec<(String, String)>) {
        let members = match group {
            GroupPlan::All(m) | GroupPlan::Any(m) => m,
        };
        for member in members {
            match member {
                CondPlan::Threshold { sensor, .. } => {
                    out.push((rule.to_string(), sensor.clone()));
                }
                CondPlan::Group(inner) => walk(inner, rule, out),
                _ => {}
            }
        }
    }
    let mut pairs = Vec::new();
    for layer in &plan.layers {
        for rule in &layer.rules {
            walk(&rule.condition, &rule.name, &mut pairs);
        }
    }
    pairs.sort();
    pairs.dedup();
    pairs
}

// ---------------------------------------------------------------------------
// Exporter task
// ---------------------------------------------------------------------------

/// Serve `GET /metrics` in Prometheus text format and log a periodic
/// one-line summary. When a Redis store is supplied, the connection gauge
/// is sampled on every summary tick.
pub async fn run_metrics_task(
    metrics: Arc<EngineMetrics>,
    config: MetricsConfig,
    store: Option<Arc<RedisStore>>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&config.prometheus_listen).await?;
    bcn_info!(
        res,
        listen = %config.prometheus_listen,
        interval = %config.report_interval,
        "metrics exporter started"
    );

    let mut tick = tokio::time::interval(config.report_interval.as_duration());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                if let Some(ref store) = store {
                    metrics.set_connections_active(store.active_connections());
                }
                bcn_info!(res, summary = %metrics.summary_line(), "metrics snapshot");
            }
            result = listener.accept() => {
                let (mut stream, _) = result?;
                let body = metrics.render_prometheus();
                let mut req_buf = [0u8; 512];
                let req_n = stream.read(&mut req_buf).await.unwrap_or(0);
                let is_metrics = req_n > 0
                    && std::str::from_utf8(&req_buf[..req_n])
                        .unwrap_or("")
                        .starts_with("GET /metrics");
                if is_metrics {
                    let header = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    stream.write_all(header.as_bytes()).await?;
                    stream.write_all(body.as_bytes()).await?;
                } else {
                    stream
                        .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                        .await?;
                }
                stream.shutdown().await?;
            }
        }
    }
    Ok(())
}

pub fn maybe_build_metrics(config: &MetricsConfig, plan: &RulePlan) -> Option<Arc<EngineMetrics>> {
    if !config.enabled {
        return None;
    }
    Some(Arc::new(EngineMetrics::new(plan)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
