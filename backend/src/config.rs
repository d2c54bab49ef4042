//! Configuration management for the inventory engine
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (config/development.toml, config/production.toml)
//! 3. Environment variable overrides with INV__ prefix

use std::time::Duration;

use config::{ConfigError, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Storage backend selection
    pub storage: StorageConfig,

    /// Reservation and adjustment rules
    pub inventory: InventoryConfig,

    /// Background job intervals
    pub scheduler: SchedulerConfig,

    /// Where low-stock alerts go
    pub alerts: AlertConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InventoryConfig {
    /// Lifetime of a checkout hold
    pub hold_ttl_minutes: i64,

    /// Grace period after closing time
    pub closing_buffer_minutes: i64,

    /// How long RELEASED reservations are kept before purge
    pub released_retention_hours: i64,
}

impl InventoryConfig {
    pub fn hold_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.hold_ttl_minutes)
    }

    pub fn closing_buffer(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.closing_buffer_minutes)
    }

    pub fn released_retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.released_retention_hours)
    }
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            hold_ttl_minutes: 15,
            closing_buffer_minutes: 15,
            released_retention_hours: 24,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Run background jobs in this process
    pub enabled: bool,

    pub expiry_sweep_secs: u64,

    pub auto_commit_sweep_secs: u64,

    pub retention_sweep_secs: u64,
}

impl SchedulerConfig {
    pub fn expiry_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_sweep_secs.max(1))
    }

    pub fn auto_commit_interval(&self) -> Duration {
        Duration::from_secs(self.auto_commit_sweep_secs.max(1))
    }

    pub fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention_sweep_secs.max(1))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            expiry_sweep_secs: 60,
            auto_commit_sweep_secs: 300,
            retention_sweep_secs: 3600,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertSink {
    Log,
    Database,
    Webhook,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertConfig {
    pub sink: AlertSink,

    /// Endpoint receiving alert JSON when `sink = webhook`
    pub webhook_url: Option<String>,

    /// HMAC-SHA256 key for the `X-Signature` header
    pub webhook_secret: Option<String>,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment = std::env::var("INV_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.url", "postgres://localhost/inventory")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("storage.backend", "postgres")?
            .set_default("inventory.hold_ttl_minutes", 15)?
            .set_default("inventory.closing_buffer_minutes", 15)?
            .set_default("inventory.released_retention_hours", 24)?
            .set_default("scheduler.enabled", true)?
            .set_default("scheduler.expiry_sweep_secs", 60)?
            .set_default("scheduler.auto_commit_sweep_secs", 300)?
            .set_default("scheduler.retention_sweep_secs", 3600)?
            .set_default("alerts.sink", "log")?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (INV prefix)
            .add_source(
                Environment::with_prefix("INV")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/inventory".to_string(),
            max_connections: 10,
            min_connections: 2,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Postgres,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            sink: AlertSink::Log,
            webhook_url: None,
            webhook_secret: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            inventory: InventoryConfig::default(),
            scheduler: SchedulerConfig::default(),
            alerts: AlertConfig::default(),
        }
    }
}
