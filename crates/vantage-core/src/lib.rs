//! Coordination layer between the engine's live endpoints and UI consumers.
//!
//! Everything here is in-memory; the engine is reached only through the
//! [`Connect`](vantage_api::Connect) seam and a caller-supplied
//! [`ProfileSource`].
//!
//! - **[`ManagedConnection`]**: one self-healing stream connection. Retries
//!   after a fixed delay and reports progress only as [`ConnectionState`]
//!   transitions.
//!
//! - **[`StreamHub`]**: reference-counted sharing of connections by stream
//!   name. Decoded values fan out to every subscriber; error frames force a
//!   reconnect. [`LiveView<T>`] layers typed decoding and a `watch` channel
//!   on top.
//!
//! - **[`PollerRegistry`]**: one timer per resource key at the fastest
//!   requested interval, with hidden/offline suppression.
//!
//! - **[`SwitchQueue`]**: latest-wins serialization of profile switches,
//!   broadcasting [`SwitchEvent`]s.
//!
//! - **[`ProfileStore`]**: confirmed profile data plus an optimistic
//!   pointer, converging on [`commit_hydrated`](ProfileStore::commit_hydrated).
//!
//! - **[`Coordinator`]**: owns one of each and bridges switch outcomes into
//!   the store.

pub mod channel;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod model;
pub mod poller;
pub mod store;
pub mod switch_queue;

#[cfg(test)]
mod testing;

use std::sync::{Mutex, MutexGuard, PoisonError};

// ── Primary re-exports ──────────────────────────────────────────────
pub use channel::view::{ConnectionsView, LogView, MemoryView, TrafficView};
pub use channel::{ChannelError, ChannelSubscription, LiveSnapshot, LiveView, StreamHub};
pub use config::{CoreConfig, DEFAULT_RECONNECT_DELAY, ReconnectConfig};
pub use connection::{ConnectionState, FrameAction, FrameHandler, ManagedConnection};
pub use coordinator::Coordinator;
pub use error::CoreError;
pub use poller::{PollOptions, PollRegistration, PollerRegistry, Presence};
pub use store::{ProfileSource, ProfileStore, ProfileStoreState, ProfilesFile};
pub use switch_queue::{SwitchEvent, SwitchObserver, SwitchQueue, SwitchTask, TaskMeta};

pub use model::{
    ConnectionEntry, ConnectionsSnapshot, KnownStream, LogLine, MemorySample, ProfileItem,
    ProfilesConfig, StreamKey, SwitchResult, TrafficSample,
};

/// Lock a std mutex, recovering the data if a previous holder panicked.
///
/// Every critical section in this crate leaves its state consistent
/// before running user callbacks, so a poisoned lock is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
