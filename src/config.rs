//! Configuration management for Wattson
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files.

use crate::error::{Result, WattsonError};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_true() -> bool {
    true
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Session store configuration
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Session lifecycle configuration
    #[serde(default)]
    pub session: SessionConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Console-specific level override
    #[serde(default)]
    pub console_level: Option<String>,

    /// File-specific level override
    #[serde(default)]
    pub file_level: Option<String>,

    /// Log file path (or directory for rotated logs)
    #[serde(default = "LoggingConfig::default_file")]
    pub file: String,

    /// Number of rotated log files to keep
    #[serde(default = "LoggingConfig::default_backup_count")]
    pub backup_count: u32,

    /// Emit JSON-formatted log lines
    #[serde(default)]
    pub json_format: bool,

    /// Also log to stdout
    #[serde(default = "default_true")]
    pub console_output: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "INFO".to_string()
    }

    fn default_file() -> String {
        "/var/log/wattson/wattson.log".to_string()
    }

    fn default_backup_count() -> u32 {
        7
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            console_level: None,
            file_level: None,
            file: Self::default_file(),
            backup_count: Self::default_backup_count(),
            json_format: false,
            console_output: true,
        }
    }
}

/// Session store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Path of the session store file
    #[serde(default = "PersistenceConfig::default_file")]
    pub file: String,
}

impl PersistenceConfig {
    fn default_file() -> String {
        "/data/wattson/sessions.json".to_string()
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            file: Self::default_file(),
        }
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long a cached charge-start authorization stays valid, in seconds
    #[serde(default = "SessionConfig::default_pending_auth_ttl_secs")]
    pub pending_auth_ttl_secs: u64,

    /// Maximum number of finished sessions retained by cleanup
    #[serde(default = "SessionConfig::default_max_retained_sessions")]
    pub max_retained_sessions: usize,
}

impl SessionConfig {
    fn default_pending_auth_ttl_secs() -> u64 {
        60
    }

    fn default_max_retained_sessions() -> usize {
        500
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pending_auth_ttl_secs: Self::default_pending_auth_ttl_secs(),
            max_retained_sessions: Self::default_max_retained_sessions(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            persistence: PersistenceConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file, falling back to defaults if the
    /// file does not exist
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let config = Config::default();
            config.validate()?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| WattsonError::config(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml_str(&contents)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents)
            .map_err(|e| WattsonError::config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = serde_yaml::to_string(self)?;
        std::fs::write(path, contents)
            .map_err(|e| WattsonError::config(format!("Failed to write config file: {}", e)))?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        let mut levels = vec![self.logging.level.clone()];
        if let Some(ref l) = self.logging.console_level {
            levels.push(l.clone());
        }
        if let Some(ref l) = self.logging.file_level {
            levels.push(l.clone());
        }
        for level in levels {
            if !valid_levels.contains(&level.to_uppercase().as_str()) {
                return Err(WattsonError::validation(
                    "logging.level".to_string(),
                    format!("Invalid log level: {}", level),
                ));
            }
        }

        if self.persistence.file.trim().is_empty() {
            return Err(WattsonError::validation(
                "persistence.file",
                "Session store path must not be empty",
            ));
        }

        if self.session.pending_auth_ttl_secs == 0 {
            return Err(WattsonError::validation(
                "session.pending_auth_ttl_secs",
                "Pending authorization TTL must be positive",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.logging.level, "INFO");
        assert_eq!(config.session.pending_auth_ttl_secs, 60);
    }

    #[test]
    fn parse_partial_yaml() {
        let yaml = r#"
logging:
  level: DEBUG
  json_format: true
session:
  pending_auth_ttl_secs: 30
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.logging.level, "DEBUG");
        assert!(config.logging.json_format);
        assert_eq!(config.session.pending_auth_ttl_secs, 30);
        // Untouched sections keep defaults
        assert_eq!(config.session.max_retained_sessions, 500);
    }

    #[test]
    fn invalid_level_rejected() {
        let yaml = "logging:\n  level: LOUD\n";
        assert!(Config::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn zero_ttl_rejected() {
        let yaml = "session:\n  pending_auth_ttl_secs: 0\n";
        assert!(Config::from_yaml_str(yaml).is_err());
    }
}
