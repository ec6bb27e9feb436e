// ── Typed live views ──
//
// A LiveView decodes one stream into a concrete payload type and keeps
// the latest value in a watch channel, so consumers can read it at any
// time or await changes.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

use super::{ChannelError, ChannelSubscription, StreamHub};
use crate::connection::ConnectionState;
use crate::model::{
    ConnectionsSnapshot, KnownStream, LogLine, MemorySample, StreamKey, TrafficSample,
};

/// What a live view currently knows about its stream.
#[derive(Debug)]
pub struct LiveSnapshot<T> {
    /// Last successfully decoded value. Kept across stream errors.
    pub value: Option<Arc<T>>,
    /// Most recent in-band error, cleared by the next good value.
    pub error: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
}

impl<T> Default for LiveSnapshot<T> {
    fn default() -> Self {
        Self {
            value: None,
            error: None,
            received_at: None,
        }
    }
}

impl<T> Clone for LiveSnapshot<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            error: self.error.clone(),
            received_at: self.received_at,
        }
    }
}

/// A typed subscription to one stream. Dropping it unsubscribes.
pub struct LiveView<T: Send + Sync + 'static> {
    hub: StreamHub,
    subscription: ChannelSubscription,
    receiver: watch::Receiver<LiveSnapshot<T>>,
}

pub type TrafficView = LiveView<TrafficSample>;
pub type MemoryView = LiveView<MemorySample>;
pub type ConnectionsView = LiveView<ConnectionsSnapshot>;
pub type LogView = LiveView<LogLine>;

impl<T: DeserializeOwned + Send + Sync + 'static> LiveView<T> {
    pub fn subscribe(hub: &StreamHub, name: &str) -> Self {
        let (tx, receiver) = watch::channel(LiveSnapshot::default());
        let tx = Arc::new(tx);
        let on_error_tx = Arc::clone(&tx);

        let subscription = hub.subscribe(
            name,
            move |value: &Arc<Value>| match T::deserialize(&**value) {
                Ok(decoded) => {
                    tx.send_modify(|snap| {
                        snap.value = Some(Arc::new(decoded));
                        snap.error = None;
                        snap.received_at = Some(Utc::now());
                    });
                }
                Err(e) => debug!(error = %e, "payload does not match view type"),
            },
            move |error: &ChannelError| {
                on_error_tx.send_modify(|snap| snap.error = Some(error.message.clone()));
            },
        );

        Self {
            hub: hub.clone(),
            subscription,
            receiver,
        }
    }
}

impl<T: Send + Sync + 'static> LiveView<T> {
    /// Identity the stream is served under now, including refreshes.
    pub fn key(&self) -> StreamKey {
        self.hub.current_key(self.subscription.name())
    }

    /// Snapshot as of now.
    pub fn latest(&self) -> LiveSnapshot<T> {
        self.receiver.borrow().clone()
    }

    pub fn value(&self) -> Option<Arc<T>> {
        self.receiver.borrow().value.clone()
    }

    /// Health of the connection currently serving this stream.
    pub fn health(&self) -> ConnectionState {
        self.hub
            .health(self.subscription.name())
            .unwrap_or(ConnectionState::Idle)
    }

    /// Force a fresh stream. Cached values are kept until the new stream
    /// delivers.
    pub fn refresh(&self) -> StreamKey {
        self.hub.refresh(self.subscription.name())
    }

    /// Wait for the next change. Returns `None` once the view is detached.
    pub async fn changed(&mut self) -> Option<LiveSnapshot<T>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Convert into a `Stream` of snapshots. The stream keeps the
    /// subscription alive.
    pub fn into_stream(self) -> LiveViewStream<T> {
        LiveViewStream {
            inner: WatchStream::new(self.receiver),
            _subscription: self.subscription,
        }
    }
}

impl LiveView<TrafficSample> {
    pub fn traffic(hub: &StreamHub) -> Self {
        Self::subscribe(hub, KnownStream::Traffic.as_ref())
    }
}

impl LiveView<MemorySample> {
    pub fn memory(hub: &StreamHub) -> Self {
        Self::subscribe(hub, KnownStream::Memory.as_ref())
    }
}

impl LiveView<ConnectionsSnapshot> {
    pub fn connections(hub: &StreamHub) -> Self {
        Self::subscribe(hub, KnownStream::Connections.as_ref())
    }
}

impl LiveView<LogLine> {
    pub fn logs(hub: &StreamHub) -> Self {
        Self::subscribe(hub, KnownStream::Logs.as_ref())
    }
}

/// `Stream` adapter over a [`LiveView`].
pub struct LiveViewStream<T: Send + Sync + 'static> {
    inner: WatchStream<LiveSnapshot<T>>,
    _subscription: ChannelSubscription,
}

impl<T: Send + Sync + 'static> Stream for LiveViewStream<T> {
    type Item = LiveSnapshot<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
