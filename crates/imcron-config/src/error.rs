//! Configuration errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),

    #[error("Config is invalid: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = ConfigError::NotFound("imcron.toml".to_string());
        assert!(err.to_string().contains("imcron.toml"));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_invalid_value_error() {
        let err = ConfigError::InvalidValue {
            field: "dcron.driver".to_string(),
            message: "unknown driver 'etcd'".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("dcron.driver"));
        assert!(display.contains("etcd"));
    }

    #[test]
    fn test_env_var_not_set_error() {
        let err = ConfigError::EnvVarNotSet("REDIS_URL".to_string());
        assert!(err.to_string().contains("REDIS_URL"));
        assert!(err.to_string().contains("not set"));
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = ConfigError::from(io_err);
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_all_error_variants_display() {
        let errors: Vec<ConfigError> = vec![
            ConfigError::NotFound("path".to_string()),
            ConfigError::InvalidFormat("format".to_string()),
            ConfigError::InvalidValue {
                field: "f".to_string(),
                message: "m".to_string(),
            },
            ConfigError::EnvVarNotSet("VAR".to_string()),
            ConfigError::Invalid("dcron.node_ttl_secs".to_string()),
        ];

        for err in errors {
            assert!(!err.to_string().is_empty());
        }
    }
}
