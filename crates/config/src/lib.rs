//! Configuration loading, env substitution and validation.
//!
//! Config files: `cardvault.toml`, `cardvault.yaml`, `cardvault.yml` or
//! `cardvault.json`, searched in `./` then the user config directory.
//!
//! `${ENV_VAR}` placeholders are substituted before parsing, and
//! `CARDVAULT_*` variables override individual values afterwards.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{apply_env_overrides, config_dir, discover_and_load, find_config_file, load, load_config},
    schema::{
        BatchConfig, CardsConfig, CardvaultConfig, DatabaseConfig, MetricsConfig, ServerConfig,
        ThrottleConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_config},
};
