use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

use crate::backup::BackupType;
use crate::scheduler::DEFAULT_HISTORY_CAPACITY;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Directory holding the job file. Relative to the config file.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub backups: BackupsConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        let expanded = expand_env_vars(&contents)?;
        Ok(serde_saphyr::from_str(&expanded)?)
    }

    /// Resolved data directory, falling back to [`DEFAULT_DATA_DIR`].
    pub fn data_dir(&self, config_path: &Path) -> PathBuf {
        let dir = self
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        resolve_path(config_path, &dir)
    }
}

/// Resolve a path relative to the config file directory.
///
/// If the path is absolute, it is returned as-is.
/// If the path is relative, it is joined with the config file's parent directory.
pub fn resolve_path(config_path: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }

    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    config_dir.join(path)
}

// ============================================================================
// Default Paths
// ============================================================================

/// Default config file name.
pub const DEFAULT_CONFIG_FILE: &str = "backupd.yaml";
/// Default data directory (relative to config file).
pub const DEFAULT_DATA_DIR: &str = ".backupd";
/// Default scripts directory (relative to config file).
pub const DEFAULT_SCRIPTS_DIR: &str = "scripts";

// ============================================================================
// HistoryConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct HistoryConfig {
    /// Newest-first entries kept in memory.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

// ============================================================================
// BackupsConfig
// ============================================================================

/// How each backup type maps to a shell command.
///
/// ```yaml
/// backups:
///   scripts_dir: ./scripts
///   commands:
///     postgres: "pg_dumpall -h ${PG_HOST:-localhost} > /backups/pg.sql"
///   restore_command: "bash ./scripts/restore.sh {timestamp} {components}"
///   env:
///     BACKUP_ROOT: /backups
/// ```
#[derive(Debug, Deserialize)]
pub struct BackupsConfig {
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,
    /// Per-type command overrides. Types without one run their default script.
    #[serde(default)]
    pub commands: HashMap<BackupType, String>,
    #[serde(default)]
    pub restore_command: Option<String>,
    /// Extra environment for every spawned command.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for BackupsConfig {
    fn default() -> Self {
        Self {
            scripts_dir: default_scripts_dir(),
            commands: HashMap::new(),
            restore_command: None,
            env: HashMap::new(),
        }
    }
}

// ============================================================================
// TasksConfig
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct TasksConfig {
    /// Kill backup and restore processes after this many seconds.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

// ============================================================================
// Private Helpers (Serde Defaults)
// ============================================================================

fn default_max_entries() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SCRIPTS_DIR)
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports:
/// - `${VAR}` - Required variable, errors if not set
/// - `${VAR:-default}` - Optional variable with default value
/// - `${VAR:-}` - Optional variable, empty string if not set
/// - `$$` - Escaped `$`
///
/// Nested expansion is not supported.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                result.push('$');
            }
            Some('{') => {
                chars.next();
                result.push_str(&parse_var_reference(&mut chars)?);
            }
            _ => result.push('$'),
        }
    }

    Ok(result)
}

/// Parse a variable reference after seeing `${`.
fn parse_var_reference(
    chars: &mut std::iter::Peekable<std::str::Chars>,
) -> Result<String, ConfigError> {
    let mut var_name = String::new();
    let mut default_value: Option<String> = None;
    let mut closed = false;

    while let Some(c) = chars.next() {
        match (c, default_value.as_mut()) {
            ('}', _) => {
                closed = true;
                break;
            }
            (':', None) if chars.peek() == Some(&'-') => {
                chars.next();
                default_value = Some(String::new());
            }
            (c, Some(default)) => default.push(c),
            (c, None) => var_name.push(c),
        }
    }

    if !closed {
        return Err(ConfigError::UnclosedVarReference);
    }

    match std::env::var(&var_name) {
        Ok(value) => Ok(value),
        Err(_) => default_value.ok_or(ConfigError::MissingEnvVar(var_name)),
    }
}

// ============================================================================
// Tests
// ============================================================================
