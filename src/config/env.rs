//! Environment variable configuration.
//!
//! This module provides environment-based configuration with sensible
//! defaults.

use std::env;
use std::path::PathBuf;

/// Environment variable names
pub mod vars {
    /// SQLite database path
    pub const DB_PATH: &str = "OLDB_DB_PATH";

    /// Permanent store root (artifact tree)
    pub const PERMANENT_STORE: &str = "OLDB_PERMANENT_STORE";

    /// Instance name
    pub const OLD_NAME: &str = "OLDB_OLD_NAME";

    /// Read-only mode ("1" or "true")
    pub const READONLY: &str = "OLDB_READONLY";

    /// Log level (trace, debug, info, warn, error)
    pub const LOG_LEVEL: &str = "OLDB_LOG_LEVEL";

    /// Data directory for databases and stores
    pub const DATA_DIR: &str = "OLDB_DATA_DIR";

    /// Enable debug mode
    pub const DEBUG_MODE: &str = "OLDB_DEBUG";
}

/// Runtime configuration from environment
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// SQLite database path
    pub db_path: Option<PathBuf>,

    /// Permanent store root
    pub permanent_store: Option<PathBuf>,

    /// Instance name
    pub old_name: Option<String>,

    /// Read-only mode
    pub readonly: bool,

    /// Log level
    pub log_level: String,

    /// Data directory
    pub data_dir: PathBuf,

    /// Debug mode
    pub debug_mode: bool,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            permanent_store: None,
            old_name: None,
            readonly: false,
            log_level: "info".to_string(),
            data_dir: default_data_dir(),
            debug_mode: false,
        }
    }
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = env::var(vars::DB_PATH) {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Ok(path) = env::var(vars::PERMANENT_STORE) {
            config.permanent_store = Some(PathBuf::from(path));
        }

        if let Ok(name) = env::var(vars::OLD_NAME) {
            config.old_name = Some(name);
        }

        config.readonly = env::var(vars::READONLY)
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        if let Ok(level) = env::var(vars::LOG_LEVEL) {
            config.log_level = level.to_lowercase();
        }

        if let Ok(dir) = env::var(vars::DATA_DIR) {
            config.data_dir = PathBuf::from(dir);
        }

        config.debug_mode = env::var(vars::DEBUG_MODE)
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        config
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(format!("Invalid log level: {}", self.log_level)),
        }

        if let Some(name) = &self.old_name {
            if name.is_empty()
                || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(format!(
                    "Invalid instance name: {} (ascii alphanumerics and _ only)",
                    name
                ));
            }
        }

        Ok(())
    }
}

/// Get default data directory
fn default_data_dir() -> PathBuf {
    if let Some(data_dir) = dirs::data_dir() {
        data_dir.join("oldb")
    } else {
        PathBuf::from("./data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EnvConfig::default();
        assert_eq!(config.log_level, "info");
        assert!(!config.readonly);
        assert!(!config.debug_mode);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = EnvConfig::default();
        config.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        config.log_level = "debug".to_string();
        config.old_name = Some("bla".to_string());
        assert!(config.validate().is_ok());

        config.old_name = Some("../evil".to_string());
        assert!(config.validate().is_err());
    }
}
