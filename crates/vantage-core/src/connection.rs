// ── Managed stream connection ──
//
// Keeps one transport alive for one stream: connect, pump frames into a
// handler, and on any failure close the transport and retry after a
// fixed delay. Failures never escape; callers observe only the
// `ConnectionState` transitions and whatever the handler delivers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vantage_api::{Connect, Frame, Transport};

use crate::config::ReconnectConfig;
use crate::lock;

// ── ConnectionState ──────────────────────────────────────────────

/// Health of a managed connection, observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying to (closed, or never started).
    Idle,
    /// First connect attempt in flight.
    Connecting,
    Open,
    /// `close()` was called; the task is winding down.
    Closing,
    /// Waiting to retry. `attempt` counts consecutive failures.
    Backoff { attempt: u32, next_retry_at: Instant },
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Short label for health indicators.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Backoff { .. } => "backoff",
        }
    }
}

/// What the frame handler wants the connection to do after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAction {
    Continue,
    /// Treat the transport as dead: close it and reconnect after the delay.
    Reconnect,
}

/// Receives every frame except `Close`, on the connection's own task.
pub type FrameHandler = Box<dyn FnMut(Frame) -> FrameAction + Send>;

// ── ManagedConnection ────────────────────────────────────────────

/// A self-healing connection to one stream.
///
/// Owns a background task; dropping the handle closes it.
pub struct ManagedConnection {
    stream: String,
    shared: Arc<Shared>,
    reconnect_tx: mpsc::UnboundedSender<()>,
}

struct Shared {
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    /// Shutdown token of the live transport, if any. At most one.
    active: Mutex<Option<CancellationToken>>,
    attempts: AtomicU64,
}

impl Shared {
    /// Publish a state unless the connection has been closed; once closed,
    /// only the winding-down states are allowed through.
    fn publish(&self, state: ConnectionState) {
        if self.cancel.is_cancelled()
            && !matches!(state, ConnectionState::Idle | ConnectionState::Closing)
        {
            return;
        }
        self.state.send_replace(state);
    }

    /// Register a freshly opened transport as the live one.
    ///
    /// Returns `false` (and closes the transport) if `close()` won the race.
    fn install(&self, transport: &Transport) -> bool {
        let mut active = lock(&self.active);
        if self.cancel.is_cancelled() {
            transport.close();
            return false;
        }
        if let Some(previous) = active.take() {
            previous.cancel();
        }
        *active = Some(transport.shutdown_token());
        true
    }

    fn release_active(&self) {
        if let Some(token) = lock(&self.active).take() {
            token.cancel();
        }
    }
}

impl ManagedConnection {
    /// Start connecting to `stream` immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        stream: impl Into<String>,
        connect: Arc<dyn Connect>,
        reconnect: ReconnectConfig,
        handler: FrameHandler,
    ) -> Self {
        let stream = stream.into();
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let shared = Arc::new(Shared {
            state,
            cancel: CancellationToken::new(),
            active: Mutex::new(None),
            attempts: AtomicU64::new(0),
        });
        let (reconnect_tx, reconnect_rx) = mpsc::unbounded_channel();

        tokio::spawn(connection_loop(
            Arc::clone(&shared),
            stream.clone(),
            connect,
            reconnect,
            handler,
            reconnect_rx,
        ));

        Self {
            stream,
            shared,
            reconnect_tx,
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Number of times the connect function has been invoked.
    pub fn attempts(&self) -> u64 {
        self.shared.attempts.load(Ordering::Relaxed)
    }

    /// Report an externally observed transport failure.
    ///
    /// The live transport is closed now; a new one is opened after the
    /// reconnect delay. No-op while already backing off or after `close()`.
    pub fn reconnect(&self) {
        if self.is_closed() {
            return;
        }
        self.shared.release_active();
        let _ = self.reconnect_tx.send(());
    }

    /// Close the connection and cancel any pending retry. Idempotent.
    pub fn close(&self) {
        if self.shared.cancel.is_cancelled() {
            return;
        }
        self.shared.publish(ConnectionState::Closing);
        self.shared.cancel.cancel();
        self.shared.release_active();
        debug!(stream = %self.stream, "connection closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }
}

impl Drop for ManagedConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ManagedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("stream", &self.stream)
            .field("state", &self.state())
            .field("attempts", &self.attempts())
            .finish_non_exhaustive()
    }
}

// ── Background reconnection loop ─────────────────────────────────

enum PumpExit {
    Closed,
    Dropped(&'static str),
}

/// Main loop: connect → pump frames → on failure, close, wait, reconnect.
async fn connection_loop(
    shared: Arc<Shared>,
    stream: String,
    connect: Arc<dyn Connect>,
    reconnect: ReconnectConfig,
    mut handler: FrameHandler,
    mut reconnect_rx: mpsc::UnboundedReceiver<()>,
) {
    let mut attempt: u32 = 0;

    loop {
        shared.attempts.fetch_add(1, Ordering::Relaxed);

        let result = tokio::select! {
            biased;
            () = shared.cancel.cancelled() => break,
            result = connect.connect(&stream) => result,
        };

        match result {
            Ok(transport) => {
                if !shared.install(&transport) {
                    break;
                }
                attempt = 0;
                // Requests aimed at a previous transport are void now.
                while reconnect_rx.try_recv().is_ok() {}
                shared.publish(ConnectionState::Open);
                info!(stream = %stream, "stream open");

                let exit = pump(&shared, transport, &mut handler, &mut reconnect_rx).await;
                shared.release_active();
                match exit {
                    PumpExit::Closed => break,
                    PumpExit::Dropped(reason) => {
                        info!(stream = %stream, reason, "stream dropped, reconnecting");
                    }
                }
            }
            Err(e) => {
                warn!(stream = %stream, error = %e, attempt, "stream connect failed");
            }
        }

        if shared.cancel.is_cancelled() {
            break;
        }

        attempt = attempt.saturating_add(1);
        let next_retry_at = Instant::now() + reconnect.delay;
        shared.publish(ConnectionState::Backoff {
            attempt,
            next_retry_at,
        });
        debug!(
            stream = %stream,
            delay_ms = u64::try_from(reconnect.delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "waiting before reconnect"
        );

        tokio::select! {
            biased;
            () = shared.cancel.cancelled() => break,
            () = tokio::time::sleep_until(next_retry_at) => {}
        }
        while reconnect_rx.try_recv().is_ok() {}
    }

    shared.publish(ConnectionState::Idle);
    debug!(stream = %stream, "connection loop exiting");
}

/// Feed frames to the handler until the transport dies or is abandoned.
///
/// The transport is closed before returning, so the caller can never
/// hold two live transports.
async fn pump(
    shared: &Shared,
    mut transport: Transport,
    handler: &mut FrameHandler,
    reconnect_rx: &mut mpsc::UnboundedReceiver<()>,
) -> PumpExit {
    let exit = loop {
        tokio::select! {
            biased;
            () = shared.cancel.cancelled() => break PumpExit::Closed,
            Some(()) = reconnect_rx.recv() => break PumpExit::Dropped("reconnect requested"),
            frame = transport.next_frame() => {
                match frame {
                    None | Some(Frame::Close) => break PumpExit::Dropped("transport closed"),
                    Some(frame) => {
                        if shared.cancel.is_cancelled() {
                            break PumpExit::Closed;
                        }
                        if handler(frame) == FrameAction::Reconnect {
                            break PumpExit::Dropped("error frame");
                        }
                    }
                }
            }
        }
    };
    transport.close();
    exit
}

// ── Tests ────────────────────────────────────────────────────────
