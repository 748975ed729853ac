//! Configuration Module
//!
//! This module defines all configuration structures for the registry service.
//! Configuration is loaded from TOML files and parsed using serde.

use serde::Deserialize;
use std::fs;

/// Main configuration structure
///
/// # Example TOML
/// ```toml
/// [api]
/// host = "127.0.0.1"
/// port = 8545
///
/// [database]
/// backend = "sqlite"
/// url = "sqlite://registry.db"
///
/// [ledger]
/// initialize_on_start = true
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

/// API server configuration
///
/// # Fields
/// - `host`: IP address to bind to (e.g., "127.0.0.1" or "0.0.0.0")
/// - `port`: TCP port to listen on (e.g., 8545)
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

/// Which world state implementation backs the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local map; contents are lost on exit
    Memory,
    Sqlite,
}

/// World state storage configuration
///
/// # Fields
/// - `backend`: "memory" or "sqlite"
/// - `url`: SQLite connection URL (e.g., "sqlite://registry.db"), ignored for memory
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub backend: StorageBackend,
    #[serde(default)]
    pub url: String,
}

/// Ledger bootstrap configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerConfig {
    /// Seed the example record at startup if it is not already stored
    #[serde(default)]
    pub initialize_on_start: bool,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Returns
    /// * `Ok(Config)` if the file was successfully loaded and parsed
    /// * `Err` if the file couldn't be read or the TOML is invalid
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;

        if config.database.backend == StorageBackend::Sqlite && config.database.url.is_empty() {
            anyhow::bail!("database.url is required for the sqlite backend");
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(
            r#"
            [api]
            host = "0.0.0.0"
            port = 9000

            [database]
            backend = "sqlite"
            url = "sqlite://registry.db"

            [ledger]
            initialize_on_start = true
            "#,
        )
        .unwrap();

        assert_eq!(config.api.port, 9000);
        assert_eq!(config.database.backend, StorageBackend::Sqlite);
        assert!(config.ledger.initialize_on_start);
    }

    #[test]
    fn test_ledger_section_is_optional() {
        let config = Config::parse(
            r#"
            [api]
            host = "127.0.0.1"
            port = 8545

            [database]
            backend = "memory"
            "#,
        )
        .unwrap();

        assert_eq!(config.database.backend, StorageBackend::Memory);
        assert!(!config.ledger.initialize_on_start);
    }

    #[test]
    fn test_sqlite_requires_url() {
        let err = Config::parse(
            r#"
            [api]
            host = "127.0.0.1"
            port = 8545

            [database]
            backend = "sqlite"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("database.url"));
    }

    #[test]
    fn test_shipped_default_config_parses() {
        let config = Config::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config/default.toml")).unwrap();
        assert_eq!(config.database.backend, StorageBackend::Sqlite);
    }
}
