// ── Stream identity types ──
//
// A StreamKey names one logical live subscription. The version suffix
// is bumped by a forced refresh so that consumers keyed on the identity
// observe a brand-new stream rather than a reconnect of the old one.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

// ── StreamKey ───────────────────────────────────────────────────────

/// Identity of a live subscription: a stream name plus a refresh version.
///
/// Version `0` renders as the bare name (`traffic`); later versions
/// render with a suffix (`traffic#3`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamKey {
    name: String,
    version: u64,
}

impl StreamKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 0,
        }
    }

    pub fn with_version(name: impl Into<String>, version: u64) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// The stream name handed to the transport.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// The same stream with its version bumped by one.
    pub fn bumped(&self) -> Self {
        Self {
            name: self.name.clone(),
            version: self.version + 1,
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version == 0 {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}#{}", self.name, self.version)
        }
    }
}

impl From<&str> for StreamKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<KnownStream> for StreamKey {
    fn from(s: KnownStream) -> Self {
        Self::new(s.as_ref())
    }
}

// ── KnownStream ─────────────────────────────────────────────────────

/// Streams the engine exposes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString, EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum KnownStream {
    Traffic,
    Memory,
    Connections,
    Logs,
}
