// ── Telemetry payload types ──
//
// Decoded JSON payloads for the engine's live streams. The core treats
// them as opaque values; these types exist for typed live views.

use serde::{Deserialize, Serialize};

/// One `traffic` sample: bytes per second in each direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSample {
    pub up: u64,
    pub down: u64,
}

/// One `memory` sample, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySample {
    pub inuse: u64,
    #[serde(default)]
    pub oslimit: u64,
}

/// One `connections` snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionsSnapshot {
    #[serde(default)]
    pub download_total: u64,
    #[serde(default)]
    pub upload_total: u64,
    /// `null` when the engine has no open connections.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub connections: Vec<ConnectionEntry>,
    #[serde(default)]
    pub memory: Option<u64>,
}

/// A single tracked connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEntry {
    pub id: String,
    #[serde(default)]
    pub upload: u64,
    #[serde(default)]
    pub download: u64,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub chains: Vec<String>,
    #[serde(default)]
    pub rule: Option<String>,
    #[serde(default)]
    pub rule_payload: Option<String>,
    /// Host, addresses, process, etc. Kept raw.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// One `logs` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    #[serde(rename = "type")]
    pub level: String,
    pub payload: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<ConnectionEntry>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<ConnectionEntry>>::deserialize(deserializer)?.unwrap_or_default())
}
