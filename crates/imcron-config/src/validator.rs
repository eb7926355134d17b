//! Configuration validation.

use crate::error::ConfigError;
use crate::schema::{Config, DriverKind};

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Turn collected errors into a single [`ConfigError`].
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        if self.is_valid() {
            return Ok(self.warnings);
        }
        let joined = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(ConfigError::Invalid(joined))
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_server(config, &mut result);
        Self::validate_redis(config, &mut result);
        Self::validate_dcron(config, &mut result);
        Self::validate_jobs(config, &mut result);
        Self::validate_logging(config, &mut result);

        result
    }

    fn validate_server(config: &Config, result: &mut ValidationResult) {
        if config.server.port == 0 {
            result.add_error(ValidationError::new("server.port", "Port cannot be 0"));
        }

        if config.server.host.is_empty() {
            result.add_error(ValidationError::new("server.host", "Host cannot be empty"));
        }
    }

    fn validate_redis(config: &Config, result: &mut ValidationResult) {
        // The memory driver never opens a connection.
        if config.dcron.driver != DriverKind::Memory {
            let url = &config.redis.url;
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                result.add_error(ValidationError::new(
                    "redis.url",
                    "url must start with redis:// or rediss://",
                ));
            }
        }

        if config.redis.op_timeout_ms == 0 {
            result.add_error(ValidationError::new(
                "redis.op_timeout_ms",
                "op_timeout_ms must be greater than 0",
            ));
        }

        if config.redis.key_prefix.is_empty() {
            result.add_warning(ValidationWarning::new(
                "redis.key_prefix",
                "key_prefix is empty, scheduler keys will share the root keyspace",
            ));
        }
    }

    fn validate_dcron(config: &Config, result: &mut ValidationResult) {
        let dcron = &config.dcron;

        if dcron.service_name.is_empty() {
            result.add_error(ValidationError::new(
                "dcron.service_name",
                "service_name cannot be empty",
            ));
        }

        if dcron.hash_replicas == 0 {
            result.add_error(ValidationError::new(
                "dcron.hash_replicas",
                "hash_replicas must be greater than 0",
            ));
        }

        if dcron.hash_replicas > 1000 {
            result.add_warning(ValidationWarning::new(
                "dcron.hash_replicas",
                "hash_replicas is very high (>1000), ring rebuilds will be slow",
            ));
        }

        if dcron.update_interval_secs == 0 {
            result.add_error(ValidationError::new(
                "dcron.update_interval_secs",
                "update_interval_secs must be greater than 0",
            ));
        }

        if dcron.node_ttl_secs < dcron.update_interval_secs * 2 {
            result.add_error(ValidationError::new(
                "dcron.node_ttl_secs",
                format!(
                    "node_ttl_secs ({}) must be at least twice update_interval_secs ({})",
                    dcron.node_ttl_secs, dcron.update_interval_secs
                ),
            ));
        }

        if dcron.recent_jobs_capacity == 0 {
            result.add_error(ValidationError::new(
                "dcron.recent_jobs_capacity",
                "recent_jobs_capacity must be greater than 0",
            ));
        }

        if dcron.driver == DriverKind::Memory {
            result.add_warning(ValidationWarning::new(
                "dcron.driver",
                "memory driver only sees this process, use it for development only",
            ));
        }
    }

    fn validate_jobs(config: &Config, result: &mut ValidationResult) {
        let url = &config.jobs.gateway_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            result.add_error(ValidationError::new(
                "jobs.gateway_url",
                "gateway_url must start with http:// or https://",
            ));
        }

        if config.jobs.voice_channel_idle_minutes == 0 {
            result.add_error(ValidationError::new(
                "jobs.voice_channel_idle_minutes",
                "voice_channel_idle_minutes must be greater than 0",
            ));
        }

        if config.jobs.request_timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "jobs.request_timeout_secs",
                "request_timeout_secs must be greater than 0",
            ));
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.as_str()) {
            result.add_warning(ValidationWarning::new(
                "logging.level",
                format!(
                    "'{}' is not a plain level {:?}, treating it as a filter directive",
                    config.logging.level, valid_levels
                ),
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
