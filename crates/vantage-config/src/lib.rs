//! Configuration for the vantage CLI.
//!
//! A TOML file in the platform config directory, overridable through
//! `VANTAGE_` environment variables, translated into
//! `vantage_core::CoreConfig`. The engine secret is resolved from an
//! environment variable, the system keyring, or the file itself, in
//! that order.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use vantage_core::{CoreConfig, ReconnectConfig};

const KEYRING_SERVICE: &str = "vantage";
const KEYRING_SECRET_USER: &str = "engine/secret";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub streams: StreamsSettings,

    #[serde(default)]
    pub profiles: ProfilesSettings,

    #[serde(default)]
    pub defaults: Defaults,
}

/// How to reach the engine's external controller.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EngineSettings {
    /// Controller base URL (e.g., "http://127.0.0.1:9097").
    #[serde(default = "default_engine_url")]
    pub url: String,

    /// Secret in plaintext (prefer keyring or env var).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    /// Environment variable name containing the secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_env: Option<String>,

    /// REST request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            url: default_engine_url(),
            secret: None,
            secret_env: None,
            timeout: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StreamsSettings {
    /// Fixed delay before a dropped stream reconnects.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl Default for StreamsSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProfilesSettings {
    /// Path to `profiles.yaml`. Defaults to the platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
        }
    }
}

fn default_engine_url() -> String {
    "http://127.0.0.1:9097".into()
}
fn default_timeout() -> u64 {
    10
}
fn default_reconnect_delay_ms() -> u64 {
    u64::try_from(vantage_core::DEFAULT_RECONNECT_DELAY.as_millis()).unwrap_or(500)
}
fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "vantage", "vantage")
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("vantage");
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default location of the application's `profiles.yaml`.
pub fn default_profiles_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("profiles.yaml"),
        |dirs| dirs.data_dir().join("profiles.yaml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields defaults.
///
/// Environment keys use `__` between sections, e.g.
/// `VANTAGE_ENGINE__URL` or `VANTAGE_STREAMS__RECONNECT_DELAY_MS`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("VANTAGE_").split("__"));

    let config: Config = figment.extract()?;
    debug!(path = %path.display(), "config loaded");
    Ok(config)
}

/// Load config, returning a default if it cannot be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(&path, cfg)?;
    Ok(path)
}

pub fn save_config_to(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Secret resolution ───────────────────────────────────────────────

/// Resolve the engine secret. `None` means the engine runs without one.
pub fn resolve_secret(engine: &EngineSettings) -> Option<SecretString> {
    // 1. Named env var
    if let Some(ref env_name) = engine.secret_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, KEYRING_SECRET_USER) {
        if let Ok(secret) = entry.get_password() {
            return Some(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    engine.secret.clone().map(SecretString::from)
}

/// Store the engine secret in the system keyring.
pub fn store_secret(secret: &str) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_SECRET_USER)
        .map_err(|e| ConfigError::Keyring(e.to_string()))?;
    entry
        .set_password(secret)
        .map_err(|e| ConfigError::Keyring(e.to_string()))
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Validate and translate into the core's runtime configuration.
    pub fn to_core_config(&self) -> Result<CoreConfig, ConfigError> {
        let engine_url: url::Url =
            self.engine
                .url
                .parse()
                .map_err(|_| ConfigError::Validation {
                    field: "engine.url".into(),
                    reason: format!("invalid URL: {}", self.engine.url),
                })?;
        if !matches!(engine_url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation {
                field: "engine.url".into(),
                reason: format!("expected http or https, got '{}'", engine_url.scheme()),
            });
        }
        if self.engine.timeout == 0 {
            return Err(ConfigError::Validation {
                field: "engine.timeout".into(),
                reason: "must be at least 1 second".into(),
            });
        }
        if self.streams.reconnect_delay_ms == 0 {
            return Err(ConfigError::Validation {
                field: "streams.reconnect_delay_ms".into(),
                reason: "must be greater than zero".into(),
            });
        }

        let profiles_path = self
            .profiles
            .path
            .clone()
            .unwrap_or_else(default_profiles_path);

        let mut core = CoreConfig::new(engine_url, profiles_path);
        core.secret = resolve_secret(&self.engine);
        core.timeout = Duration::from_secs(self.engine.timeout);
        core.reconnect = ReconnectConfig {
            delay: Duration::from_millis(self.streams.reconnect_delay_ms),
        };
        Ok(core)
    }
}
