// ── Domain model ──
//
// Stream identities, decoded telemetry payloads, and profile types.

pub mod profile;
pub mod stream_key;
pub mod telemetry;

pub use profile::{ProfileItem, ProfilesConfig, SwitchResult};
pub use stream_key::{KnownStream, StreamKey};
pub use telemetry::{ConnectionEntry, ConnectionsSnapshot, LogLine, MemorySample, TrafficSample};
