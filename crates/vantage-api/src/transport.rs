// Transport abstraction shared by every streaming source.
//
// A `Transport` is one open connection to one stream: a receiver of
// frames plus a shutdown token. Concrete connectors (WebSocket, in-memory)
// produce transports through the `Connect` trait; the core never sees
// the wire beneath them.

use std::fmt::Display;
use std::future::Future;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Prefix the engine uses for in-band error frames.
pub const ERROR_MARKER: &str = "Websocket error";

// ── Frame ────────────────────────────────────────────────────────────

/// A single frame received from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Textual payload: a JSON document, or an error marker.
    Text(String),
    /// Binary payload. The engine never sends these; they are ignored upstream.
    Binary(Vec<u8>),
    /// The peer closed the stream.
    Close,
}

impl Frame {
    /// Build an in-band error frame carrying `message`.
    pub fn error(message: impl Display) -> Self {
        Self::Text(format!("{ERROR_MARKER}: {message}"))
    }

    /// Returns `true` for text frames carrying the error marker.
    pub fn is_error_marker(&self) -> bool {
        matches!(self, Self::Text(text) if text.starts_with(ERROR_MARKER))
    }
}

// ── Transport ────────────────────────────────────────────────────────

/// One open connection to a stream.
///
/// Closing is idempotent. Dropping a transport closes it, which also
/// signals the producing side (e.g. the WebSocket reader task) to stop.
#[derive(Debug)]
pub struct Transport {
    frames: mpsc::UnboundedReceiver<Frame>,
    shutdown: CancellationToken,
}

impl Transport {
    pub fn new(frames: mpsc::UnboundedReceiver<Frame>, shutdown: CancellationToken) -> Self {
        Self { frames, shutdown }
    }

    /// Create an in-memory transport and the sender that feeds it.
    pub fn pair() -> (TransportSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let sender = TransportSender {
            frames: tx,
            shutdown: shutdown.clone(),
        };
        (sender, Self::new(rx, shutdown))
    }

    /// Wait for the next frame. Returns `None` once the transport is
    /// closed or the producer has gone away.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        if self.shutdown.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => None,
            frame = self.frames.recv() => frame,
        }
    }

    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// A clone of the token that closes this transport.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Producer half of a [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportSender {
    frames: mpsc::UnboundedSender<Frame>,
    shutdown: CancellationToken,
}

impl TransportSender {
    /// Push a frame. Returns `false` if the transport is already closed.
    pub fn send(&self, frame: Frame) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        self.frames.send(frame).is_ok()
    }

    /// Push a text frame.
    pub fn text(&self, payload: impl Into<String>) -> bool {
        self.send(Frame::Text(payload.into()))
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.frames.is_closed()
    }

    /// Resolves once the consuming side closes or drops the transport.
    pub async fn closed(&self) {
        tokio::select! {
            () = self.shutdown.cancelled() => {}
            () = self.frames.closed() => {}
        }
    }
}

// ── Connect ──────────────────────────────────────────────────────────

/// Opens a fresh [`Transport`] for a named stream.
///
/// Implemented by [`WsConnector`](crate::WsConnector) and by any
/// `Fn(&str) -> impl Future<Output = Result<Transport, Error>>` closure.
pub trait Connect: Send + Sync + 'static {
    fn connect(&self, stream: &str) -> BoxFuture<'static, Result<Transport, Error>>;
}

impl<F, Fut> Connect for F
where
    F: Fn(&str) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Transport, Error>> + Send + 'static,
{
    fn connect(&self, stream: &str) -> BoxFuture<'static, Result<Transport, Error>> {
        Box::pin(self(stream))
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn error_marker_detection() {
        assert!(Frame::error("connection reset").is_error_marker());
        assert!(Frame::Text("Websocket error: boom".into()).is_error_marker());
        assert!(!Frame::Text(r#"{"up":1,"down":2}"#.into()).is_error_marker());
        assert!(!Frame::Close.is_error_marker());
    }

    #[tokio::test]
    async fn pair_delivers_frames_in_order() {
        let (tx, mut transport) = Transport::pair();
        assert!(tx.text("one"));
        assert!(tx.text("two"));

        assert_eq!(transport.next_frame().await, Some(Frame::Text("one".into())));
        assert_eq!(transport.next_frame().await, Some(Frame::Text("two".into())));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_visible_to_sender() {
        let (tx, mut transport) = Transport::pair();
        transport.close();
        transport.close();

        assert!(transport.is_closed());
        assert!(tx.is_closed());
        assert!(!tx.text("late"));
        assert_eq!(transport.next_frame().await, None);
        tx.closed().await;
    }

    #[tokio::test]
    async fn dropping_transport_signals_sender() {
        let (tx, transport) = Transport::pair();
        drop(transport);
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn closures_implement_connect() {
        let connect = |stream: &str| {
            let stream = stream.to_owned();
            async move {
                let (tx, transport) = Transport::pair();
                tx.text(stream);
                Ok::<_, Error>(transport)
            }
        };

        let mut transport = connect.connect("traffic").await.unwrap();
        assert_eq!(
            transport.next_frame().await,
            Some(Frame::Text("traffic".into()))
        );
    }
}
