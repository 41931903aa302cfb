//! Config schema. Every section and field has a default, so an empty file
//! (or no file) yields a runnable configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardvaultConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub batch: BatchConfig,
    pub throttle: ThrottleConfig,
    pub metrics: MetricsConfig,
    pub cards: CardsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Origins allowed by CORS.
    pub cors_origins: Vec<String>,
    /// Trust `X-Forwarded-For` and friends for the client address.
    pub behind_proxy: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8080,
            cors_origins: vec!["https://localhost:3000".into()],
            behind_proxy: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx SQLite URL.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://cardvault.db?mode=rwc".into(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Fixed size of the worker pool running batch update items.
    pub max_workers: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_workers: 8 }
    }
}

/// Per-IP request limits, per minute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub api_per_minute: u32,
    /// Applies to `/api/v1/admin/*`.
    pub admin_per_minute: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            api_per_minute: 6000,
            admin_per_minute: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardsConfig {
    /// Earliest accepted expiry year.
    pub min_expiry_year: i32,
}

impl Default for CardsConfig {
    fn default() -> Self {
        Self {
            min_expiry_year: 2024,
        }
    }
}
