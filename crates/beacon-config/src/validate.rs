use crate::beacon::BeaconConfig;

/// Validate a parsed [`BeaconConfig`]. Called from the loader; all
/// violations here are fatal at startup.
pub fn validate(config: &BeaconConfig) -> anyhow::Result<()> {
    if config.redis.endpoints.is_empty() {
        anyhow::bail!("[redis] endpoints must list at least one host:port");
    }
    for ep in &config.redis.endpoints {
        if !ep.contains(':') {
            anyhow::bail!("[redis] endpoint {ep:?} is not host:port");
        }
    }
    if config.redis.pool_size == 0 || config.redis.pool_size > 50 {
        anyhow::bail!(
            "[redis] pool_size must be in 1..=50, got {}",
            config.redis.pool_size
        );
    }
    if config.redis.sync_timeout_ms == 0 {
        anyhow::bail!("[redis] sync_timeout_ms must be positive");
    }

    if config.engine.cycle_time_ms == 0 {
        anyhow::bail!("[engine] cycle_time_ms must be positive");
    }
    if let Some(t) = config.engine.test_mode_cycle_time_ms
        && t == 0
    {
        anyhow::bail!("[engine] test_mode_cycle_time_ms must be positive when set");
    }
    if config.engine.buffer_capacity == 0 {
        anyhow::bail!("[engine] buffer_capacity must be positive");
    }
    if config.engine.max_dependency_depth == 0 {
        anyhow::bail!("[engine] max_dependency_depth must be at least 1");
    }
    if config.engine.rules.trim().is_empty() {
        anyhow::bail!("[engine] rules glob must not be empty");
    }

    Ok(())
}
