//! Filepath: src/config.rs
//! Configuration loading and deterministic merge order.
//!
//! Effective configuration is built exactly once per process:
//! built-in defaults, then an optional `quarry.toml` at the repository
//! root, then startup overrides. Every limit is a positive integer bounded
//! by a hard cap, and nothing in the config file can relax the denylist.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::security::paths::canonical_root;
use crate::security::policy::SecurityLimits;

pub const MAX_FILE_BYTES_CAP: u64 = 4 * 1024 * 1024;
pub const MAX_OPEN_LINES_CAP: usize = 2_000;
pub const MAX_TOTAL_BYTES_PER_RESPONSE_CAP: usize = 1024 * 1024;
pub const MAX_SEARCH_HITS_CAP: usize = 200;
pub const MAX_REFERENCES_CAP: usize = 500;

/// File name of the optional repository-local config table.
pub const REPO_CONFIG_FILE: &str = "quarry.toml";

/// Extensions indexed by default: the AST-backed family, the lexical
/// adapter families, and common text/config formats.
const DEFAULT_INCLUDE_EXTENSIONS: &[&str] = &[
    ".py", ".md", ".rst", ".toml", ".yaml", ".yml", ".json", ".ini", ".cfg", ".ts", ".tsx", ".js",
    ".jsx", ".mjs", ".cjs", ".go", ".rs", ".java", ".c", ".cc", ".cpp", ".cxx", ".h", ".hh",
    ".hpp", ".cs",
];

const DEFAULT_EXCLUDE_GLOBS: &[&str] = &[
    "**/.git/**",
    "**/__pycache__/**",
    "**/.venv/**",
    "**/node_modules/**",
    "**/target/**",
];

/// Config field names that would relax the denylist; their presence is a
/// hard load failure, not a warning.
const DENYLIST_RELAX_FIELDS: &[&str] =
    &["denylist_override", "denylist_allowlist", "denylist_relax"];

/// Deterministic indexing settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSettings {
    pub include_extensions: Vec<String>,
    pub exclude_globs: Vec<String>,
}

/// Adapter feature toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterToggles {
    pub python_enabled: bool,
}

/// Fully merged server configuration, immutable after startup.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub repo_root: PathBuf,
    pub data_dir: PathBuf,
    pub limits: SecurityLimits,
    pub index: IndexSettings,
    pub adapters: AdapterToggles,
}

impl EffectiveConfig {
    /// Serializable config snapshot for tool responses.
    pub fn to_public_value(&self) -> Value {
        json!({
            "repo_root": self.repo_root.to_string_lossy(),
            "data_dir": self.data_dir.to_string_lossy(),
            "limits": {
                "max_file_bytes": self.limits.max_file_bytes,
                "max_open_lines": self.limits.max_open_lines,
                "max_total_bytes_per_response": self.limits.max_total_bytes_per_response,
                "max_search_hits": self.limits.max_search_hits,
                "max_references": self.limits.max_references,
            },
            "index": {
                "include_extensions": self.index.include_extensions,
                "exclude_globs": self.index.exclude_globs,
            },
            "adapters": {
                "python_enabled": self.adapters.python_enabled,
            },
        })
    }
}

/// Optional startup overrides applied at highest precedence.
#[derive(Debug, Clone, Default)]
pub struct StartupOverrides {
    pub data_dir: Option<PathBuf>,
    pub max_file_bytes: Option<u64>,
    pub max_open_lines: Option<usize>,
    pub max_total_bytes_per_response: Option<usize>,
    pub max_search_hits: Option<usize>,
    pub max_references: Option<usize>,
    pub python_enabled: Option<bool>,
}

/// Deterministic configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("{REPO_CONFIG_FILE} is not valid TOML: {0}")]
    Parse(String),
    #[error("{0}")]
    Invalid(String),
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

/// Build default config for a given repository root.
pub fn default_config(repo_root: &Path) -> EffectiveConfig {
    let resolved_root = canonical_root(repo_root);
    let data_dir = resolved_root.join(".quarry");
    EffectiveConfig {
        repo_root: resolved_root,
        data_dir,
        limits: SecurityLimits::default(),
        index: IndexSettings {
            include_extensions: DEFAULT_INCLUDE_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            exclude_globs: DEFAULT_EXCLUDE_GLOBS
                .iter()
                .map(|glob| glob.to_string())
                .collect(),
        },
        adapters: AdapterToggles {
            python_enabled: true,
        },
    }
}

/// Load the optional repo config table from `<repo_root>/quarry.toml`.
pub fn load_repo_config_file(repo_root: &Path) -> Result<toml::Table, ConfigError> {
    let config_path = repo_root.join(REPO_CONFIG_FILE);
    if !config_path.exists() {
        return Ok(toml::Table::new());
    }
    let text = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Io {
        path: config_path.to_string_lossy().into_owned(),
        source,
    })?;
    text.parse::<toml::Table>()
        .map_err(|err| ConfigError::Parse(err.to_string()))
}

/// Load effective config using merge order defaults -> repo config -> overrides.
pub fn load_effective_config(
    repo_root: &Path,
    overrides: &StartupOverrides,
) -> Result<EffectiveConfig, ConfigError> {
    let base = default_config(repo_root);
    let payload = load_repo_config_file(&base.repo_root)?;
    merge_config(base, &payload, overrides)
}

/// Merge defaults, repo config, then startup overrides.
pub fn merge_config(
    base: EffectiveConfig,
    repo_payload: &toml::Table,
    overrides: &StartupOverrides,
) -> Result<EffectiveConfig, ConfigError> {
    let limits_payload = section(repo_payload, "limits")?;
    let index_payload = section(repo_payload, "index")?;
    let adapters_payload = section(repo_payload, "adapters")?;
    let security_payload = section(repo_payload, "security")?;

    for field in DENYLIST_RELAX_FIELDS {
        if security_payload.contains_key(*field) {
            return Err(ConfigError::invalid(format!(
                "Config field 'security.{field}' is not supported; \
                 the default denylist cannot be relaxed."
            )));
        }
    }

    let limits = SecurityLimits {
        max_file_bytes: positive_with_cap_u64(
            limits_payload.get("max_file_bytes"),
            "limits.max_file_bytes",
            base.limits.max_file_bytes,
            MAX_FILE_BYTES_CAP,
        )?,
        max_open_lines: positive_with_cap(
            limits_payload.get("max_open_lines"),
            "limits.max_open_lines",
            base.limits.max_open_lines,
            MAX_OPEN_LINES_CAP,
        )?,
        max_total_bytes_per_response: positive_with_cap(
            limits_payload.get("max_total_bytes_per_response"),
            "limits.max_total_bytes_per_response",
            base.limits.max_total_bytes_per_response,
            MAX_TOTAL_BYTES_PER_RESPONSE_CAP,
        )?,
        max_search_hits: positive_with_cap(
            limits_payload.get("max_search_hits"),
            "limits.max_search_hits",
            base.limits.max_search_hits,
            MAX_SEARCH_HITS_CAP,
        )?,
        max_references: positive_with_cap(
            limits_payload.get("max_references"),
            "limits.max_references",
            base.limits.max_references,
            MAX_REFERENCES_CAP,
        )?,
    };

    let include_extensions = match index_payload.get("include_extensions") {
        Some(value) => string_list(value, "index.include_extensions")?,
        None => base.index.include_extensions.clone(),
    };
    let exclude_globs = match index_payload.get("exclude_globs") {
        Some(value) => string_list(value, "index.exclude_globs")?,
        None => base.index.exclude_globs.clone(),
    };

    let python_enabled = match adapters_payload.get("python_enabled") {
        Some(toml::Value::Boolean(flag)) => *flag,
        Some(_) => {
            return Err(ConfigError::invalid(
                "Config field 'adapters.python_enabled' must be a boolean.",
            ));
        }
        None => base.adapters.python_enabled,
    };

    let merged = EffectiveConfig {
        repo_root: base.repo_root,
        data_dir: base.data_dir,
        limits,
        index: IndexSettings {
            include_extensions,
            exclude_globs,
        },
        adapters: AdapterToggles { python_enabled },
    };
    apply_startup_overrides(merged, overrides)
}

/// Apply startup overrides at highest precedence, re-checking caps.
pub fn apply_startup_overrides(
    config: EffectiveConfig,
    overrides: &StartupOverrides,
) -> Result<EffectiveConfig, ConfigError> {
    let limits = SecurityLimits {
        max_file_bytes: override_with_cap_u64(
            overrides.max_file_bytes,
            "overrides.max_file_bytes",
            config.limits.max_file_bytes,
            MAX_FILE_BYTES_CAP,
        )?,
        max_open_lines: override_with_cap(
            overrides.max_open_lines,
            "overrides.max_open_lines",
            config.limits.max_open_lines,
            MAX_OPEN_LINES_CAP,
        )?,
        max_total_bytes_per_response: override_with_cap(
            overrides.max_total_bytes_per_response,
            "overrides.max_total_bytes_per_response",
            config.limits.max_total_bytes_per_response,
            MAX_TOTAL_BYTES_PER_RESPONSE_CAP,
        )?,
        max_search_hits: override_with_cap(
            overrides.max_search_hits,
            "overrides.max_search_hits",
            config.limits.max_search_hits,
            MAX_SEARCH_HITS_CAP,
        )?,
        max_references: override_with_cap(
            overrides.max_references,
            "overrides.max_references",
            config.limits.max_references,
            MAX_REFERENCES_CAP,
        )?,
    };

    let data_dir = overrides
        .data_dir
        .clone()
        .unwrap_or_else(|| config.data_dir.clone());
    Ok(EffectiveConfig {
        repo_root: config.repo_root,
        data_dir,
        limits,
        index: config.index,
        adapters: AdapterToggles {
            python_enabled: overrides
                .python_enabled
                .unwrap_or(config.adapters.python_enabled),
        },
    })
}

/// Summary view used by `repo.status`; always includes `max_references`.
pub fn limits_summary(limits: &SecurityLimits) -> Map<String, Value> {
    let value = json!({
        "max_file_bytes": limits.max_file_bytes,
        "max_open_lines": limits.max_open_lines,
        "max_total_bytes_per_response": limits.max_total_bytes_per_response,
        "max_search_hits": limits.max_search_hits,
        "max_references": limits.max_references,
    });
    value.as_object().cloned().unwrap_or_default()
}

fn section(payload: &toml::Table, key: &str) -> Result<toml::Table, ConfigError> {
    match payload.get(key) {
        None => Ok(toml::Table::new()),
        Some(toml::Value::Table(table)) => Ok(table.clone()),
        Some(_) => Err(ConfigError::invalid(format!(
            "Config section '{key}' must be a table."
        ))),
    }
}

fn string_list(value: &toml::Value, field: &str) -> Result<Vec<String>, ConfigError> {
    let toml::Value::Array(items) = value else {
        return Err(ConfigError::invalid(format!(
            "Config field '{field}' must be a list of strings."
        )));
    };
    let mut output = Vec::with_capacity(items.len());
    for item in items {
        let toml::Value::String(text) = item else {
            return Err(ConfigError::invalid(format!(
                "Config field '{field}' must contain only strings."
            )));
        };
        output.push(text.clone());
    }
    Ok(output)
}

fn positive_with_cap(
    value: Option<&toml::Value>,
    name: &str,
    default: usize,
    cap: usize,
) -> Result<usize, ConfigError> {
    match value {
        None => Ok(default),
        Some(toml::Value::Integer(raw)) if *raw >= 1 => {
            let candidate = *raw as usize;
            if candidate > cap {
                return Err(ConfigError::invalid(format!(
                    "Config field '{name}' must be <= {cap}."
                )));
            }
            Ok(candidate)
        }
        Some(_) => Err(ConfigError::invalid(format!(
            "Config field '{name}' must be a positive integer."
        ))),
    }
}

fn positive_with_cap_u64(
    value: Option<&toml::Value>,
    name: &str,
    default: u64,
    cap: u64,
) -> Result<u64, ConfigError> {
    match value {
        None => Ok(default),
        Some(toml::Value::Integer(raw)) if *raw >= 1 => {
            let candidate = *raw as u64;
            if candidate > cap {
                return Err(ConfigError::invalid(format!(
                    "Config field '{name}' must be <= {cap}."
                )));
            }
            Ok(candidate)
        }
        Some(_) => Err(ConfigError::invalid(format!(
            "Config field '{name}' must be a positive integer."
        ))),
    }
}

fn override_with_cap(
    value: Option<usize>,
    name: &str,
    default: usize,
    cap: usize,
) -> Result<usize, ConfigError> {
    match value {
        None => Ok(default),
        Some(candidate) if candidate >= 1 && candidate <= cap => Ok(candidate),
        Some(candidate) if candidate > cap => Err(ConfigError::invalid(format!(
            "Config field '{name}' must be <= {cap}."
        ))),
        Some(_) => Err(ConfigError::invalid(format!(
            "Config field '{name}' must be a positive integer."
        ))),
    }
}

fn override_with_cap_u64(
    value: Option<u64>,
    name: &str,
    default: u64,
    cap: u64,
) -> Result<u64, ConfigError> {
    match value {
        None => Ok(default),
        Some(candidate) if candidate >= 1 && candidate <= cap => Ok(candidate),
        Some(candidate) if candidate > cap => Err(ConfigError::invalid(format!(
            "Config field '{name}' must be <= {cap}."
        ))),
        Some(_) => Err(ConfigError::invalid(format!(
            "Config field '{name}' must be a positive integer."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn table(text: &str) -> toml::Table {
        text.parse().unwrap()
    }

    #[test]
    fn defaults_are_within_caps() {
        let tmp = TempDir::new().unwrap();
        let config = default_config(tmp.path());
        assert!(config.limits.max_file_bytes <= MAX_FILE_BYTES_CAP);
        assert!(config.limits.max_open_lines <= MAX_OPEN_LINES_CAP);
        assert!(config.limits.max_search_hits <= MAX_SEARCH_HITS_CAP);
        assert!(config.limits.max_references <= MAX_REFERENCES_CAP);
        assert!(config.adapters.python_enabled);
        assert!(config.data_dir.ends_with(".quarry"));
    }

    #[test]
    fn repo_config_overrides_defaults_then_cli_wins() {
        let tmp = TempDir::new().unwrap();
        let base = default_config(tmp.path());
        let payload = table(
            "[limits]\nmax_search_hits = 25\nmax_open_lines = 100\n\
             [adapters]\npython_enabled = false\n",
        );
        let overrides = StartupOverrides {
            max_open_lines: Some(40),
            ..StartupOverrides::default()
        };
        let merged = merge_config(base, &payload, &overrides).unwrap();
        assert_eq!(merged.limits.max_search_hits, 25);
        // CLI override beats the repo file.
        assert_eq!(merged.limits.max_open_lines, 40);
        assert!(!merged.adapters.python_enabled);
    }

    #[test]
    fn denylist_relax_fields_fail_the_load() {
        let tmp = TempDir::new().unwrap();
        for field in ["denylist_override", "denylist_allowlist", "denylist_relax"] {
            let base = default_config(tmp.path());
            let payload = table(&format!("[security]\n{field} = [\"*.pem\"]\n"));
            let err = merge_config(base, &payload, &StartupOverrides::default()).unwrap_err();
            assert!(err.to_string().contains(field), "field: {field}");
        }
    }

    #[test]
    fn limits_above_cap_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let base = default_config(tmp.path());
        let payload = table("[limits]\nmax_search_hits = 500\n");
        let err = merge_config(base, &payload, &StartupOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("max_search_hits"));

        let base = default_config(tmp.path());
        let overrides = StartupOverrides {
            max_file_bytes: Some(MAX_FILE_BYTES_CAP + 1),
            ..StartupOverrides::default()
        };
        assert!(merge_config(base, &toml::Table::new(), &overrides).is_err());
    }

    #[test]
    fn non_positive_limits_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let base = default_config(tmp.path());
        let payload = table("[limits]\nmax_open_lines = 0\n");
        assert!(merge_config(base, &payload, &StartupOverrides::default()).is_err());
    }

    #[test]
    fn string_list_fields_are_validated() {
        let tmp = TempDir::new().unwrap();
        let base = default_config(tmp.path());
        let payload = table("[index]\ninclude_extensions = [1, 2]\n");
        assert!(merge_config(base, &payload, &StartupOverrides::default()).is_err());

        let base = default_config(tmp.path());
        let payload = table("[index]\ninclude_extensions = [\".py\"]\n");
        let merged = merge_config(base, &payload, &StartupOverrides::default()).unwrap();
        assert_eq!(merged.index.include_extensions, vec![".py".to_string()]);
    }

    #[test]
    fn load_effective_config_reads_repo_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(REPO_CONFIG_FILE),
            "[limits]\nmax_search_hits = 12\n",
        )
        .unwrap();
        let config = load_effective_config(tmp.path(), &StartupOverrides::default()).unwrap();
        assert_eq!(config.limits.max_search_hits, 12);
    }

    #[test]
    fn limits_summary_always_includes_max_references() {
        let limits = SecurityLimits::default();
        let summary = limits_summary(&limits);
        assert!(summary.contains_key("max_references"));
        assert_eq!(summary["max_references"], serde_json::json!(100));
    }
}
