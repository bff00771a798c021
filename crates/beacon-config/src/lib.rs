pub mod beacon;
pub mod engine;
pub mod logging;
pub mod metrics;
pub mod redis;
pub mod types;
pub mod validate;

pub use beacon::BeaconConfig;
pub use engine::{EngineConfig, resolve_glob};
pub use logging::{LogFormat, LoggingConfig};
pub use metrics::MetricsConfig;
pub use redis::{HealthCheckConfig, RedisConfig, RedisMetricsConfig};
pub use types::HumanDuration;
