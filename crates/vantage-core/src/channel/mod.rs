// ── Shared stream channels ──
//
// One managed connection per stream name, shared by every subscriber to
// that name. The first subscriber opens it, the last one tears it down.
// Frames are decoded once and fanned out to all listeners; in-band error
// frames go to error listeners and force a reconnect.

pub mod view;

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use vantage_api::{Connect, Frame};

use crate::config::ReconnectConfig;
use crate::connection::{ConnectionState, FrameAction, ManagedConnection};
use crate::lock;
use crate::model::StreamKey;

pub use view::{LiveSnapshot, LiveView, LiveViewStream};

/// An in-band error delivered to a stream's error listeners.
#[derive(Debug, Clone)]
pub struct ChannelError {
    /// Identity of the stream that reported the error.
    pub key: StreamKey,
    /// The raw error frame text.
    pub message: String,
    /// Last good value, still valid for display.
    pub stale: Option<Arc<Value>>,
}

type ValueFn = Arc<dyn Fn(&Arc<Value>) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&ChannelError) + Send + Sync>;

struct Listener {
    on_value: ValueFn,
    on_error: ErrorFn,
    active: Arc<AtomicBool>,
}

struct ChannelEntry {
    key: StreamKey,
    listeners: IndexMap<u64, Listener>,
    latest: Option<Arc<Value>>,
    connection: ManagedConnection,
}

#[derive(Default)]
struct HubState {
    entries: HashMap<String, ChannelEntry>,
    /// Refresh versions, kept after an entry is torn down.
    versions: HashMap<String, u64>,
}

struct HubInner {
    connect: Arc<dyn Connect>,
    reconnect: ReconnectConfig,
    state: Mutex<HubState>,
    next_id: AtomicU64,
}

// ── StreamHub ────────────────────────────────────────────────────

/// Registry of shared stream channels.
///
/// Cheaply cloneable; all clones share one registry. Subscribing or
/// refreshing spawns connection tasks, so these calls need a Tokio
/// runtime.
#[derive(Clone)]
pub struct StreamHub {
    inner: Arc<HubInner>,
}

impl StreamHub {
    pub fn new(connect: Arc<dyn Connect>, reconnect: ReconnectConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                connect,
                reconnect,
                state: Mutex::new(HubState::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Attach listeners to the stream `name`.
    ///
    /// Opens the stream if this is its first subscriber. Listeners run on
    /// the connection task and must not block.
    pub fn subscribe<V, E>(&self, name: &str, on_value: V, on_error: E) -> ChannelSubscription
    where
        V: Fn(&Arc<Value>) + Send + Sync + 'static,
        E: Fn(&ChannelError) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        let listener = Listener {
            on_value: Arc::new(on_value),
            on_error: Arc::new(on_error),
            active: Arc::clone(&active),
        };

        let mut state = lock(&self.inner.state);
        let version = state.versions.get(name).copied().unwrap_or(0);
        let entry = match state.entries.entry(name.to_owned()) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => {
                let key = StreamKey::with_version(name, version);
                debug!(stream = %key, "first subscriber, opening stream");
                let connection = self.inner.open(&key);
                vacant.insert(ChannelEntry {
                    key,
                    listeners: IndexMap::new(),
                    latest: None,
                    connection,
                })
            }
        };
        entry.listeners.insert(id, listener);
        let key = entry.key.clone();
        drop(state);

        ChannelSubscription {
            hub: Arc::downgrade(&self.inner),
            name: name.to_owned(),
            key,
            id,
            active,
        }
    }

    /// Force a fresh stream for `name`: bump its version, close the
    /// current connection and open a new one. Subscribers stay attached;
    /// the cached latest value is cleared.
    ///
    /// Returns the new identity. With no subscribers only the version
    /// moves, so the next subscriber starts at the new identity.
    pub fn refresh(&self, name: &str) -> StreamKey {
        let mut state = lock(&self.inner.state);
        let version = state.versions.entry(name.to_owned()).or_insert(0);
        *version += 1;
        let key = StreamKey::with_version(name, *version);

        if let Some(entry) = state.entries.get_mut(name) {
            entry.connection.close();
            entry.key = key.clone();
            entry.latest = None;
            entry.connection = self.inner.open(&key);
            debug!(stream = %key, "stream refreshed");
        }
        key
    }

    /// Identity new or existing subscribers of `name` are bound to.
    pub fn current_key(&self, name: &str) -> StreamKey {
        let state = lock(&self.inner.state);
        let version = state.versions.get(name).copied().unwrap_or(0);
        StreamKey::with_version(name, version)
    }

    /// Last decoded value for `name`, if the stream is live and has
    /// delivered one since it was opened or refreshed.
    pub fn latest(&self, name: &str) -> Option<Arc<Value>> {
        lock(&self.inner.state)
            .entries
            .get(name)
            .and_then(|entry| entry.latest.clone())
    }

    pub fn subscriber_count(&self, name: &str) -> usize {
        lock(&self.inner.state)
            .entries
            .get(name)
            .map_or(0, |entry| entry.listeners.len())
    }

    /// Connection health for `name`; `None` when nobody subscribes to it.
    pub fn health(&self, name: &str) -> Option<ConnectionState> {
        lock(&self.inner.state)
            .entries
            .get(name)
            .map(|entry| entry.connection.state())
    }

    /// Watch the health of the connection currently serving `name`.
    ///
    /// A refresh replaces the connection; re-acquire the receiver after one.
    pub fn watch_health(&self, name: &str) -> Option<watch::Receiver<ConnectionState>> {
        lock(&self.inner.state)
            .entries
            .get(name)
            .map(|entry| entry.connection.watch_state())
    }

    /// Identities of every stream with at least one subscriber.
    pub fn active_keys(&self) -> Vec<StreamKey> {
        let mut keys: Vec<StreamKey> = lock(&self.inner.state)
            .entries
            .values()
            .map(|entry| entry.key.clone())
            .collect();
        keys.sort_by(|a, b| a.name().cmp(b.name()));
        keys
    }

    /// Detach every listener and close every stream.
    pub fn shutdown(&self) {
        let drained: Vec<ChannelEntry> = {
            let mut state = lock(&self.inner.state);
            state.entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &drained {
            for listener in entry.listeners.values() {
                listener.active.store(false, Ordering::Release);
            }
            entry.connection.close();
        }
        if !drained.is_empty() {
            debug!(streams = drained.len(), "stream hub shut down");
        }
    }
}

impl std::fmt::Debug for StreamHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHub")
            .field("active", &self.active_keys())
            .finish_non_exhaustive()
    }
}

impl HubInner {
    fn open(self: &Arc<Self>, key: &StreamKey) -> ManagedConnection {
        let hub = Arc::downgrade(self);
        let frame_key = key.clone();
        ManagedConnection::spawn(
            key.name(),
            Arc::clone(&self.connect),
            self.reconnect,
            Box::new(move |frame| match hub.upgrade() {
                Some(hub) => hub.dispatch(&frame_key, frame),
                None => FrameAction::Continue,
            }),
        )
    }

    /// Route one frame from the connection serving `key`.
    fn dispatch(&self, key: &StreamKey, frame: Frame) -> FrameAction {
        let text = match frame {
            Frame::Text(text) => text,
            Frame::Binary(bytes) => {
                trace!(stream = %key, len = bytes.len(), "ignoring binary frame");
                return FrameAction::Continue;
            }
            Frame::Close => return FrameAction::Continue,
        };

        if text.starts_with(vantage_api::ERROR_MARKER) {
            let Some((listeners, stale)) = self.error_targets(key) else {
                return FrameAction::Continue;
            };
            warn!(stream = %key, message = %text, "stream reported an error");
            let error = ChannelError {
                key: key.clone(),
                message: text,
                stale,
            };
            for (on_error, active) in listeners {
                if active.load(Ordering::Acquire) {
                    on_error(&error);
                }
            }
            return FrameAction::Reconnect;
        }

        let value = match serde_json::from_str::<Value>(&text) {
            Ok(value) => Arc::new(value),
            Err(e) => {
                debug!(stream = %key, error = %e, "skipping malformed frame");
                return FrameAction::Continue;
            }
        };

        let targets: Vec<(ValueFn, Arc<AtomicBool>)> = {
            let mut state = lock(&self.state);
            let Some(entry) = state.entries.get_mut(key.name()) else {
                return FrameAction::Continue;
            };
            if entry.key != *key {
                return FrameAction::Continue;
            }
            entry.latest = Some(Arc::clone(&value));
            entry
                .listeners
                .values()
                .map(|l| (Arc::clone(&l.on_value), Arc::clone(&l.active)))
                .collect()
        };
        for (on_value, active) in targets {
            if active.load(Ordering::Acquire) {
                on_value(&value);
            }
        }
        FrameAction::Continue
    }

    #[allow(clippy::type_complexity)]
    fn error_targets(
        &self,
        key: &StreamKey,
    ) -> Option<(Vec<(ErrorFn, Arc<AtomicBool>)>, Option<Arc<Value>>)> {
        let state = lock(&self.state);
        let entry = state.entries.get(key.name())?;
        if entry.key != *key {
            return None;
        }
        let listeners = entry
            .listeners
            .values()
            .map(|l| (Arc::clone(&l.on_error), Arc::clone(&l.active)))
            .collect();
        Some((listeners, entry.latest.clone()))
    }

    fn unsubscribe(&self, name: &str, id: u64) {
        let removed = {
            let mut state = lock(&self.state);
            let Some(entry) = state.entries.get_mut(name) else {
                return;
            };
            entry.listeners.shift_remove(&id);
            if entry.listeners.is_empty() {
                state.entries.remove(name)
            } else {
                None
            }
        };
        if let Some(entry) = removed {
            entry.connection.close();
            debug!(stream = %entry.key, "last subscriber left, stream closed");
        }
    }
}

// ── ChannelSubscription ──────────────────────────────────────────

/// Handle for one listener pair. Dropping it unsubscribes.
pub struct ChannelSubscription {
    hub: Weak<HubInner>,
    name: String,
    key: StreamKey,
    id: u64,
    active: Arc<AtomicBool>,
}

impl ChannelSubscription {
    /// Stream identity at the time of subscribing.
    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Detach now. After this returns neither listener is invoked again.
    pub fn unsubscribe(self) {
        drop(self);
    }

    fn release(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(&self.name, self.id);
        }
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ChannelSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSubscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────
