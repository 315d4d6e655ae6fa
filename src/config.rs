use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub index: IndexConfig,
}

/// Storage backend selection and connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend kind: "sqlite" or "document"
    pub backend: String,
    /// Database file path for the sqlite backend
    pub sqlite_path: String,
    /// Connection pool bound for the sqlite backend
    pub max_connections: u32,
    /// Directory path for the document backend
    pub document_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
    pub format: String, // "json" or "text"
}

/// Temporal index maintenance settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Seconds between full background rebuilds
    pub rebuild_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                backend: "sqlite".to_string(),
                sqlite_path: "data/archive.db".to_string(),
                max_connections: 10,
                document_path: "data/archive.docs".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file_path: None,
                format: "text".to_string(),
            },
            index: IndexConfig {
                rebuild_interval_secs: 3600,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence:
    /// defaults, then `config/default` and `config/local` files, then
    /// `CHAT_ARCHIVE_*` environment variables.
    pub fn load() -> Result<Self> {
        let defaults = AppConfig::default();

        let config = Config::builder()
            .set_default("storage.backend", defaults.storage.backend)?
            .set_default("storage.sqlite_path", defaults.storage.sqlite_path)?
            .set_default(
                "storage.max_connections",
                i64::from(defaults.storage.max_connections),
            )?
            .set_default("storage.document_path", defaults.storage.document_path)?
            .set_default("logging.level", defaults.logging.level)?
            .set_default("logging.format", defaults.logging.format)?
            .set_default(
                "index.rebuild_interval_secs",
                i64::try_from(defaults.index.rebuild_interval_secs).unwrap_or(3600),
            )?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("CHAT_ARCHIVE").separator("__"))
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_backends = ["sqlite", "document"];
        if !valid_backends.contains(&self.storage.backend.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid storage backend: {}. Must be one of: {:?}",
                self.storage.backend,
                valid_backends
            ));
        }

        if self.storage.max_connections == 0 {
            return Err(anyhow::anyhow!("max_connections must be greater than 0"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            ));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            ));
        }

        if self.index.rebuild_interval_secs == 0 {
            return Err(anyhow::anyhow!(
                "rebuild_interval_secs must be greater than 0"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.storage.backend, "sqlite");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.index.rebuild_interval_secs, 3600);
    }

    #[test]
    fn test_config_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_backend() {
        let mut config = AppConfig::default();
        config.storage.backend = "couchbase".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_pool_bound() {
        let mut config = AppConfig::default();
        config.storage.max_connections = 0;
        assert!(config.validate().is_err());
    }
}
