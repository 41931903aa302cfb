use std::path::{Path, PathBuf};

use {
    anyhow::{Context, bail},
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::CardvaultConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "cardvault.toml",
    "cardvault.yaml",
    "cardvault.yml",
    "cardvault.json",
];

/// Environment variables that override individual config values.
pub const ENV_BIND: &str = "CARDVAULT_BIND";
pub const ENV_PORT: &str = "CARDVAULT_PORT";
pub const ENV_DATABASE_URL: &str = "CARDVAULT_DATABASE_URL";
pub const ENV_METRICS_ENABLED: &str = "CARDVAULT_METRICS_ENABLED";
pub const ENV_BATCH_WORKERS: &str = "CARDVAULT_BATCH_WORKERS";

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<CardvaultConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path).with_context(|| format!("failed to parse {}", path.display()))
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./cardvault.{toml,yaml,yml,json}`
/// 2. the user config dir, e.g. `~/.config/cardvault/`
///
/// Falls back to defaults when no file exists or the file fails to load.
pub fn discover_and_load() -> CardvaultConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    CardvaultConfig::default()
}

/// Load `path` when given, otherwise discover; then apply env overrides.
///
/// An explicit path that fails to load is an error rather than a fallback.
pub fn load(path: Option<&Path>) -> anyhow::Result<CardvaultConfig> {
    let mut config = match path {
        Some(p) => load_config(p)?,
        None => discover_and_load(),
    };
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .or_else(|| {
            let dir = config_dir()?;
            CONFIG_FILENAMES
                .iter()
                .map(|name| dir.join(name))
                .find(|p| p.exists())
        })
}

/// Returns the user-global config directory.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "cardvault").map(|d| d.config_dir().to_path_buf())
}

/// Apply `CARDVAULT_*` overrides from the process environment.
pub fn apply_env_overrides(config: &mut CardvaultConfig) -> anyhow::Result<()> {
    apply_env_overrides_with(config, |name| std::env::var(name).ok())
}

fn apply_env_overrides_with(
    config: &mut CardvaultConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    if let Some(bind) = lookup(ENV_BIND) {
        config.server.bind = bind;
    }
    if let Some(port) = lookup(ENV_PORT) {
        config.server.port = port
            .parse()
            .with_context(|| format!("{ENV_PORT} is not a port: {port}"))?;
    }
    if let Some(url) = lookup(ENV_DATABASE_URL) {
        config.database.url = url;
    }
    if let Some(enabled) = lookup(ENV_METRICS_ENABLED) {
        config.metrics.enabled = parse_bool(&enabled)
            .with_context(|| format!("{ENV_METRICS_ENABLED} is not a boolean: {enabled}"))?;
    }
    if let Some(workers) = lookup(ENV_BATCH_WORKERS) {
        config.batch.max_workers = workers
            .parse()
            .with_context(|| format!("{ENV_BATCH_WORKERS} is not a number: {workers}"))?;
    }
    Ok(())
}

fn parse_bool(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("unrecognized boolean {other:?}"),
    }
}

pub(crate) fn parse_config(raw: &str, path: &Path) -> anyhow::Result<CardvaultConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => bail!("unsupported config format: .{ext}"),
    }
}

/// Parse into a generic JSON value for structural checks.
pub(crate) fn parse_config_value(raw: &str, path: &Path) -> anyhow::Result<serde_json::Value> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => {
            let v: toml::Value = toml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "yaml" | "yml" => {
            let v: serde_yaml::Value = serde_yaml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "json" => Ok(serde_json::from_str(raw)?),
        _ => bail!("unsupported config format: .{ext}"),
    }
}
