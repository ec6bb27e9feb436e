//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use vantage_config::ConfigError;
use vantage_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const SWITCH_FAILED: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the engine at {url}")]
    #[diagnostic(
        code(vantage::connection_failed),
        help(
            "Check that the engine is running with its external controller enabled.\n\
             URL: {url}\n\
             Override with: vantage --engine http://127.0.0.1:9097 ..."
        )
    )]
    ConnectionFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("The engine rejected the configured secret")]
    #[diagnostic(
        code(vantage::unauthorized),
        help(
            "Store the engine secret with: vantage config init\n\
             Or name an environment variable in engine.secret_env."
        )
    )]
    Unauthorized,

    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(vantage::timeout),
        help("Increase the timeout with --timeout or check engine responsiveness.")
    )]
    Timeout { seconds: u64 },

    // ── Profiles ─────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(vantage::not_found),
        help("Run: vantage {list_command} to see available {resource_type}s")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("Could not read profiles from {path}")]
    #[diagnostic(
        code(vantage::profiles_unavailable),
        help(
            "{reason}\n\
             Point profiles.path at your profiles.yaml, or set VANTAGE_PROFILES__PATH."
        )
    )]
    ProfilesUnavailable { path: String, reason: String },

    #[error("Switch to '{profile}' failed: {message}")]
    #[diagnostic(code(vantage::switch_failed))]
    SwitchFailed { profile: String, message: String },

    // ── Engine ───────────────────────────────────────────────────────
    #[error("Engine error: {message}")]
    #[diagnostic(code(vantage::engine))]
    Engine { message: String },

    // ── Validation / configuration ───────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(vantage::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(
        code(vantage::config),
        help("Inspect the resolved settings with: vantage config show")
    )]
    Config(Box<ConfigError>),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render JSON: {0}")]
    #[diagnostic(code(vantage::json))]
    Json(#[from] serde_json::Error),

    #[error("Failed to render YAML: {0}")]
    #[diagnostic(code(vantage::yaml))]
    Yaml(#[from] serde_yaml::Error),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(Box::new(other)),
        }
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Unauthorized => exit_code::AUTH,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::SwitchFailed { .. } => exit_code::SWITCH_FAILED,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed {
                url,
                source: reason.into(),
            },

            CoreError::Unauthorized => CliError::Unauthorized,

            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },

            CoreError::ProfileNotFound { uid } => CliError::NotFound {
                resource_type: "profile".into(),
                identifier: uid,
                list_command: "profiles".into(),
            },

            CoreError::Io { path, source } => CliError::ProfilesUnavailable {
                path,
                reason: source.to_string(),
            },

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::TaskFailed { message }
            | CoreError::Rejected { message }
            | CoreError::Hydration { message }
            | CoreError::Api { message, .. }
            | CoreError::Internal(message) => CliError::Engine { message },
        }
    }
}
