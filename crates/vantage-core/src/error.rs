// ── Core error types ──
//
// User-facing errors from vantage-core. Consumers never see HTTP status
// codes or socket failures directly: the `From<vantage_api::Error>` impl
// translates transport-layer errors into domain-appropriate variants.
// Stream-level failures never reach this type at all; they are absorbed
// by the managed connection and surface only as state transitions.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach engine at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Engine rejected the configured secret")]
    Unauthorized,

    #[error("Engine request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Switch / hydration errors ────────────────────────────────────
    #[error("Profile switch failed: {message}")]
    TaskFailed { message: String },

    #[error("Operation rejected by engine: {message}")]
    Rejected { message: String },

    #[error("Failed to load canonical profiles: {message}")]
    Hydration { message: String },

    #[error("Profile not found: {uid}")]
    ProfileNotFound { uid: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration / IO errors ────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Human-readable message for progress/result display.
    ///
    /// Variants carrying an explicit `message` yield it verbatim; every
    /// other variant falls back to its `Display` rendering.
    pub fn message(&self) -> String {
        match self {
            Self::TaskFailed { message }
            | Self::Rejected { message }
            | Self::Hydration { message }
            | Self::Api { message, .. }
            | Self::Config { message } => message.clone(),
            other => other.to_string(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<vantage_api::Error> for CoreError {
    fn from(err: vantage_api::Error) -> Self {
        match err {
            vantage_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            vantage_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            vantage_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            vantage_api::Error::Api { status, message } => {
                if status == 400 {
                    CoreError::Rejected { message }
                } else {
                    CoreError::Api {
                        message,
                        status: Some(status),
                    }
                }
            }
            vantage_api::Error::Unauthorized => CoreError::Unauthorized,
            vantage_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket connection failed: {reason}"),
            },
            vantage_api::Error::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket closed (code {code}): {reason}"),
            },
            vantage_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_prefers_explicit_field() {
        let err = CoreError::TaskFailed {
            message: "engine refused config".into(),
        };
        assert_eq!(err.message(), "engine refused config");
    }

    #[test]
    fn message_falls_back_to_display() {
        let err = CoreError::ProfileNotFound { uid: "p9".into() };
        assert_eq!(err.message(), "Profile not found: p9");
    }

    #[test]
    fn bad_request_maps_to_rejected() {
        let err: CoreError = vantage_api::Error::Api {
            status: 400,
            message: "bad yaml".into(),
        }
        .into();
        assert!(matches!(err, CoreError::Rejected { ref message } if message == "bad yaml"));
    }
}
