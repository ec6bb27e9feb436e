// ── Runtime coordination configuration ──
//
// These types describe *how* to reach the engine and how aggressively to
// retry. They carry the secret, but never touch disk: the CLI or the
// host application builds a `CoreConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

/// Fixed delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Reconnect policy for managed stream connections.
///
/// The delay is fixed: attempts are counted for observability but do not
/// stretch the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay between a failure and the next connect attempt. Default: 500ms.
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Configuration for one engine.
///
/// Built by the CLI or host application, passed to the `Coordinator`.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Engine external-controller URL (e.g., `http://127.0.0.1:9097`).
    pub engine_url: Url,
    /// Bearer secret for the engine API, if one is configured.
    pub secret: Option<SecretString>,
    /// Request timeout for REST calls.
    pub timeout: Duration,
    /// Stream reconnect policy.
    pub reconnect: ReconnectConfig,
    /// Location of the application's `profiles.yaml`.
    pub profiles_path: PathBuf,
}

impl CoreConfig {
    pub fn new(engine_url: Url, profiles_path: PathBuf) -> Self {
        Self {
            engine_url,
            secret: None,
            timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
            profiles_path,
        }
    }
}
