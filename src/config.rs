//! Configuration for an OLDB instance.

pub mod env;

use std::path::PathBuf;

use self::env::EnvConfig;

/// Settings for one OLD instance.
///
/// Mirrors the deployment configuration file: where the database lives,
/// where the permanent store (artifact tree) is rooted, which instance
/// name namespaces it, and whether the instance accepts mutations.
#[derive(Debug, Clone)]
pub struct Settings {
    /// SQLite database path (the `db_url` configuration key).
    pub db_path: PathBuf,
    /// Root of the permanent store; per-resource directories live under
    /// `<permanent_store>/<old_name>/`.
    pub permanent_store: PathBuf,
    /// Instance name, e.g. an ISO 639-3 code for the object language.
    pub old_name: String,
    /// When true, every mutating operation is rejected.
    pub readonly: bool,
    /// Whether uploaded files get size-reduced derivative copies.
    pub create_reduced_size_file_copies: bool,
    /// Preferred lossy format for derived audio copies.
    pub preferred_lossy_audio_format: String,
    /// Start with an empty database (no default fixtures).
    pub empty_database: bool,
    /// Load the ISO 639 language table on initialization.
    pub add_language_data: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let env_config = EnvConfig::from_env();
        let data_dir = env_config.data_dir.clone();
        Self {
            db_path: data_dir.join("oldb.sqlite"),
            permanent_store: data_dir.join("store"),
            old_name: "old".to_string(),
            readonly: false,
            create_reduced_size_file_copies: true,
            preferred_lossy_audio_format: "ogg".to_string(),
            empty_database: false,
            add_language_data: true,
        }
    }
}

impl Settings {
    /// Create settings from environment variables.
    pub fn from_env() -> Self {
        let env_config = EnvConfig::from_env();
        let mut settings = Self::default();
        if let Some(path) = env_config.db_path {
            settings.db_path = path;
        }
        if let Some(path) = env_config.permanent_store {
            settings.permanent_store = path;
        }
        if let Some(name) = env_config.old_name {
            settings.old_name = name;
        }
        settings.readonly = env_config.readonly;
        settings
    }

    /// In-memory settings rooted in the given directory. Every test gets
    /// its own root so artifact trees never collide.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            db_path: root.join("oldb.sqlite"),
            permanent_store: root.join("store"),
            old_name: "testold".to_string(),
            readonly: false,
            create_reduced_size_file_copies: false,
            preferred_lossy_audio_format: "ogg".to_string(),
            empty_database: true,
            add_language_data: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.old_name, "old");
        assert!(!settings.readonly);
    }

    #[test]
    fn test_for_root() {
        let settings = Settings::for_root("/tmp/x");
        assert_eq!(settings.db_path, PathBuf::from("/tmp/x/oldb.sqlite"));
        assert_eq!(settings.permanent_store, PathBuf::from("/tmp/x/store"));
    }
}
