//! Configuration validation with range checks.

use crate::error::ConfigError;

use super::Config;

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.processing.repeat_count == 0 {
            return Err(ConfigError::ValidationError(
                "processing.repeat_count must be > 0".into(),
            ));
        }
        if self.processing.max_threads == 0 {
            return Err(ConfigError::ValidationError(
                "processing.max_threads must be > 0".into(),
            ));
        }
        if self.processing.sleep_time_secs < 0.0 {
            return Err(ConfigError::ValidationError(
                "processing.sleep_time_secs must be >= 0".into(),
            ));
        }
        if self.pool.cooldown_secs < 0.0 {
            return Err(ConfigError::ValidationError(
                "pool.cooldown_secs must be >= 0".into(),
            ));
        }
        if self.pool.acquire_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "pool.acquire_timeout_secs must be > 0".into(),
            ));
        }
        if self.service.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "service.request_timeout_secs must be > 0".into(),
            ));
        }
        if self.service.max_image_edge == 0 {
            return Err(ConfigError::ValidationError(
                "service.max_image_edge must be > 0".into(),
            ));
        }
        for (name, threshold) in [
            (
                "coverage.single_caption_threshold",
                self.coverage.single_caption_threshold,
            ),
            (
                "coverage.multi_caption_threshold",
                self.coverage.multi_caption_threshold,
            ),
        ] {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be between 0.0 and 1.0"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_passes_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_repeat_count() {
        let mut config = Config::default();
        config.processing.repeat_count = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("repeat_count"));
    }

    #[test]
    fn test_validate_rejects_zero_max_threads() {
        let mut config = Config::default();
        config.processing.max_threads = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_threads"));
    }

    #[test]
    fn test_validate_rejects_zero_request_timeout() {
        let mut config = Config::default();
        config.service.request_timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("request_timeout_secs"));
    }

    #[test]
    fn test_validate_rejects_out_of_range_threshold() {
        let mut config = Config::default();
        config.coverage.single_caption_threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("single_caption_threshold"));

        config.coverage.single_caption_threshold = -0.1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("single_caption_threshold"));
    }
}
