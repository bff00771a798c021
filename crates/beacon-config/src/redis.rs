use serde::Deserialize;

/// Redis connection settings.
///
/// `pool_size` defaults to twice the logical CPU count, capped at 50.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    /// Endpoints as `host:port` strings. At least one is required.
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub allow_admin: bool,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
    #[serde(default = "default_keep_alive_sec")]
    pub keep_alive_sec: u64,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub metrics: RedisMetricsConfig,
}

/// Background connection health probing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval_sec: u64,
    /// Consecutive ping failures before a pool slot is marked unhealthy.
    pub failure_threshold: u32,
    pub timeout_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_sec: 10,
            failure_threshold: 3,
            timeout_ms: 1_000,
        }
    }
}

/// Per-endpoint operation sampling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisMetricsConfig {
    pub enabled: bool,
    pub instance_name: String,
    pub sampling_interval_sec: u64,
}

impl Default for RedisMetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            instance_name: "beacon".to_string(),
            sampling_interval_sec: 10,
        }
    }
}

pub(crate) fn default_pool_size() -> usize {
    (num_cpus::get() * 2).min(50)
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    50
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

fn default_sync_timeout_ms() -> u64 {
    1_000
}

fn default_keep_alive_sec() -> u64 {
    30
}
