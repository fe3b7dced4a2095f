use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Pool concurrency limits are non-zero
/// - Retry bounds are sane (max_attempts > 0, base <= cap)
/// - Visibility timeout is non-zero
/// - The sweep stale threshold exceeds the backoff cap, so scheduled
///   retries are not double-published
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.capture.concurrency_limit == 0 {
        return Err(ConfigError::ValidationError(
            "capture.concurrency_limit cannot be 0".to_string(),
        ));
    }

    if config.detection.concurrency_limit == 0 {
        return Err(ConfigError::ValidationError(
            "detection.concurrency_limit cannot be 0".to_string(),
        ));
    }

    if config.coordinator.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "coordinator.max_attempts cannot be 0".to_string(),
        ));
    }

    if config.coordinator.backoff_base_secs > config.coordinator.backoff_cap_secs {
        return Err(ConfigError::ValidationError(
            "coordinator.backoff_base_secs cannot exceed backoff_cap_secs".to_string(),
        ));
    }

    if config.broker.visibility_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "broker.visibility_timeout_secs cannot be 0".to_string(),
        ));
    }

    if config.coordinator.sweep_stale_after_secs <= config.coordinator.backoff_cap_secs {
        return Err(ConfigError::ValidationError(
            "coordinator.sweep_stale_after_secs must exceed backoff_cap_secs".to_string(),
        ));
    }

    Ok(())
}
