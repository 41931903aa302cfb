//! Configuration validation.
//!
//! Parses a config file, flags unknown (usually misspelled) fields, and
//! reports values the service cannot run with.

use std::{
    collections::HashMap,
    net::IpAddr,
    path::{Path, PathBuf},
};

use crate::{
    loader::{find_config_file, parse_config, parse_config_value},
    schema::CardvaultConfig,
};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "value", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "server.port"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}: {}", self.severity, self.message)
        } else {
            write!(f, "{} [{}]: {}", self.severity, self.path, self.message)
        }
    }
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

/// Expected shape of the config document.
enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    Leaf,
}

fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Struct};

    Struct(HashMap::from([
        (
            "server",
            Struct(HashMap::from([
                ("bind", Leaf),
                ("port", Leaf),
                ("cors_origins", Leaf),
                ("behind_proxy", Leaf),
            ])),
        ),
        (
            "database",
            Struct(HashMap::from([("url", Leaf), ("max_connections", Leaf)])),
        ),
        ("batch", Struct(HashMap::from([("max_workers", Leaf)]))),
        (
            "throttle",
            Struct(HashMap::from([
                ("api_per_minute", Leaf),
                ("admin_per_minute", Leaf),
            ])),
        ),
        ("metrics", Struct(HashMap::from([("enabled", Leaf)]))),
        ("cards", Struct(HashMap::from([("min_expiry_year", Leaf)]))),
    ]))
}

/// Validate a config file at `path`, or the discovered file when `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = path.map(Path::to_path_buf).or_else(find_config_file);

    let Some(actual_path) = config_path else {
        let mut diagnostics = vec![Diagnostic::new(
            Severity::Info,
            "file-ref",
            "",
            "no config file found; using defaults",
        )];
        diagnostics.extend(validate_config(&CardvaultConfig::default()));
        return ValidationResult {
            diagnostics,
            config_path: None,
        };
    };

    let diagnostics = match std::fs::read_to_string(&actual_path) {
        Ok(content) => validate_str(&crate::env_subst::substitute_env(&content), &actual_path),
        Err(e) => vec![Diagnostic::new(
            Severity::Error,
            "syntax",
            "",
            format!("failed to read config file: {e}"),
        )],
    };
    ValidationResult {
        diagnostics,
        config_path: Some(actual_path),
    }
}

/// Validate config text; the format is taken from `path`'s extension.
#[must_use]
pub fn validate_str(raw: &str, path: &Path) -> Vec<Diagnostic> {
    let value = match parse_config_value(raw, path) {
        Ok(v) => v,
        Err(e) => {
            return vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("syntax error: {e}"),
            )];
        },
    };

    let mut diagnostics = Vec::new();
    check_unknown_fields(&value, &build_schema_map(), "", &mut diagnostics);

    match parse_config(raw, path) {
        Ok(config) => diagnostics.extend(validate_config(&config)),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }
    diagnostics
}

/// Check values of an already-parsed config.
#[must_use]
pub fn validate_config(config: &CardvaultConfig) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    let mut error = |path: &str, message: String| {
        out.push(Diagnostic::new(Severity::Error, "value", path, message));
    };

    if config.server.bind.parse::<IpAddr>().is_err() {
        error(
            "server.bind",
            format!("not an IP address: {:?}", config.server.bind),
        );
    }
    if config.server.port == 0 {
        error("server.port", "must be greater than 0".into());
    }
    if config.database.url.trim().is_empty() {
        error("database.url", "must not be empty".into());
    } else if !config.database.url.starts_with("sqlite:") {
        error(
            "database.url",
            format!("only sqlite URLs are supported: {}", config.database.url),
        );
    }
    if config.database.max_connections == 0 {
        error("database.max_connections", "must be greater than 0".into());
    }
    if config.batch.max_workers == 0 {
        error("batch.max_workers", "must be greater than 0".into());
    }
    if config.throttle.api_per_minute == 0 {
        error("throttle.api_per_minute", "must be greater than 0".into());
    }
    if config.throttle.admin_per_minute == 0 {
        error("throttle.admin_per_minute", "must be greater than 0".into());
    }

    if config.server.cors_origins.iter().any(|o| o == "*") {
        out.push(Diagnostic::new(
            Severity::Warning,
            "value",
            "server.cors_origins",
            "wildcard origin lets any site call the card API from a browser",
        ));
    }
    if config.database.url.contains(":memory:") {
        out.push(Diagnostic::new(
            Severity::Warning,
            "value",
            "database.url",
            "in-memory database loses every card on restart",
        ));
    }
    out
}

fn check_unknown_fields(
    value: &serde_json::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (serde_json::Value::Object(table), KnownKeys::Struct(fields)) = (value, schema) else {
        return;
    };
    for (key, child) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match fields.get(key.as_str()) {
            Some(child_schema) => check_unknown_fields(child, child_schema, &path, diagnostics),
            None => {
                let known: Vec<&str> = fields.keys().copied().collect();
                let message = match suggest(key, &known, 3) {
                    Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                    None => "unknown field".to_string(),
                };
                diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    "unknown-field",
                    path,
                    message,
                ));
            },
        }
    }
}

/// Closest candidate within `max_distance` edits.
fn suggest<'a>(input: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(input, c)))
        .filter(|(_, d)| *d <= max_distance)
        .min_by_key(|(c, d)| (*d, *c))
        .map(|(c, _)| c)
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut row = Vec::with_capacity(b.len() + 1);
        row.push(i + 1);
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            row.push((prev[j] + cost).min(prev[j + 1] + 1).min(row[j] + 1));
        }
        prev = row;
    }
    prev[b.len()]
}
