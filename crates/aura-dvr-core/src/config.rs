//! Runtime configuration resolver.
//!
//! Merges the command line, the environment and the `[persistence]` section of
//! the config file into a [`RuntimeConfig`]. Retention precedence is
//! CLI → `AURA_RETENTION_SECONDS` → `retention_seconds` in the file → 86400.
//! Path precedence (only when persistence is on) is CLI → `AURA_DB_PATH` →
//! `db_path` in the file → `<data-dir>/Aura/telemetry.sqlite`.
//!
//! Malformed numeric values never fall through to the next source; the error
//! names the variable or key that was wrong.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result, require_positive_finite};

pub const DEFAULT_RETENTION_SECONDS: f64 = 24.0 * 60.0 * 60.0;
pub const ENV_RETENTION_SECONDS: &str = "AURA_RETENTION_SECONDS";
pub const ENV_DB_PATH: &str = "AURA_DB_PATH";

const APP_DIR_NAME: &str = "Aura";
/// Historical name; the store is plain text.
const DB_FILE_NAME: &str = "telemetry.sqlite";
const CONFIG_FILE_NAME: &str = "aura.toml";
const PERSISTENCE_SECTION: &str = "[persistence]";

/// Where the resolved database path came from. Diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DbSource {
    Cli,
    Env,
    Config,
    Auto,
    Disabled,
}

impl DbSource {
    pub fn as_str(self) -> &'static str {
        match self {
            DbSource::Cli => "cli",
            DbSource::Env => "env",
            DbSource::Config => "config",
            DbSource::Auto => "auto",
            DbSource::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeConfig {
    pub persistence_enabled: bool,
    pub retention_seconds: f64,
    pub db_source: DbSource,
    /// Empty when persistence is disabled.
    pub db_path: String,
}

/// Resolver input collected from the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigRequest {
    pub cli_db_path: Option<String>,
    pub no_persist: bool,
    pub cli_retention_seconds: Option<f64>,
    pub config_path_override: Option<PathBuf>,
}

/// Process environment as seen by the resolver.
pub trait ConfigEnv {
    /// Returns the raw value of an environment variable, if set.
    fn var(&self, key: &str) -> Option<String>;

    /// Returns the per-user platform data directory.
    fn data_dir(&self) -> Option<PathBuf>;
}

/// Reads the real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl ConfigEnv for SystemEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn data_dir(&self) -> Option<PathBuf> {
        dirs::data_dir().or_else(|| std::env::current_dir().ok())
    }
}

/// Values honored from the `[persistence]` section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileConfig {
    pub db_path: Option<String>,
    pub retention_seconds: Option<f64>,
}

/// Resolves against the real process environment.
pub fn resolve(request: &ConfigRequest) -> Result<RuntimeConfig> {
    resolve_with(request, &SystemEnv)
}

pub fn resolve_with(request: &ConfigRequest, env: &dyn ConfigEnv) -> Result<RuntimeConfig> {
    let config_path = request
        .config_path_override
        .clone()
        .unwrap_or_else(|| default_config_path(env));
    let file = load_file_config(&config_path)?;

    let retention_seconds = resolve_retention(request, env, &file)?;

    if request.no_persist {
        debug!("persistence disabled from command line");
        return Ok(RuntimeConfig {
            persistence_enabled: false,
            retention_seconds,
            db_source: DbSource::Disabled,
            db_path: String::new(),
        });
    }

    let (db_source, db_path) = if let Some(path) = non_empty(request.cli_db_path.as_deref()) {
        (DbSource::Cli, path)
    } else if let Some(path) = non_empty(env.var(ENV_DB_PATH).as_deref()) {
        (DbSource::Env, path)
    } else if let Some(path) = non_empty(file.db_path.as_deref()) {
        (DbSource::Config, path)
    } else {
        let path = default_db_path(env);
        (DbSource::Auto, path.to_string_lossy().into_owned())
    };

    debug!(
        source = db_source.as_str(),
        path = %db_path,
        retention_seconds,
        "resolved telemetry store location"
    );

    Ok(RuntimeConfig {
        persistence_enabled: true,
        retention_seconds,
        db_source,
        db_path,
    })
}

fn resolve_retention(request: &ConfigRequest, env: &dyn ConfigEnv, file: &FileConfig) -> Result<f64> {
    if let Some(value) = request.cli_retention_seconds {
        return require_positive_finite(value, "retention_seconds");
    }
    if let Some(raw) = non_empty(env.var(ENV_RETENTION_SECONDS).as_deref()) {
        return parse_positive_finite(&raw, ENV_RETENTION_SECONDS);
    }
    Ok(file.retention_seconds.unwrap_or(DEFAULT_RETENTION_SECONDS))
}

/// `<data-dir>/Aura/telemetry.sqlite`
pub fn default_db_path(env: &dyn ConfigEnv) -> PathBuf {
    app_dir(env).join(DB_FILE_NAME)
}

/// `<data-dir>/Aura/aura.toml`
pub fn default_config_path(env: &dyn ConfigEnv) -> PathBuf {
    app_dir(env).join(CONFIG_FILE_NAME)
}

fn app_dir(env: &dyn ConfigEnv) -> PathBuf {
    env.data_dir().unwrap_or_default().join(APP_DIR_NAME)
}

/// Reads and parses a config file. A missing file is an empty config.
pub fn load_file_config(path: &Path) -> Result<FileConfig> {
    match fs::read_to_string(path) {
        Ok(contents) => parse_file_config(&contents),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(FileConfig::default()),
        Err(e) => Err(Error::io("failed to read config file", path, e)),
    }
}

/// Parses the `key = value` format. Only `[persistence]` is honored; unknown
/// sections and keys are ignored.
pub fn parse_file_config(contents: &str) -> Result<FileConfig> {
    let mut out = FileConfig::default();
    let mut in_persistence = false;

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            in_persistence = line == PERSISTENCE_SECTION;
            continue;
        }
        if !in_persistence {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "db_path" => {
                let path = strip_quotes(value);
                if !path.is_empty() {
                    out.db_path = Some(path.to_string());
                }
            }
            "retention_seconds" => {
                out.retention_seconds = Some(parse_positive_finite(value, "retention_seconds")?);
            }
            _ => {}
        }
    }

    Ok(out)
}

fn parse_positive_finite(raw: &str, source: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
        .ok_or_else(|| {
            Error::runtime(format!(
                "{} must be a finite number greater than 0 (got '{}').",
                source,
                raw.trim()
            ))
        })
}

fn strip_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && ((bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\''))
    {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
