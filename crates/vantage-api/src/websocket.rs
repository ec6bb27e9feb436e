//! WebSocket connector for the engine's streaming endpoints.
//!
//! Each call to [`Connect::connect`] performs one WebSocket handshake
//! against `ws(s)://<engine>/<stream>` and spawns a reader task that
//! forwards frames into a [`Transport`]. Reconnection is *not* handled
//! here -- that is the job of the managed connection in `vantage-core`.
//!
//! # Example
//!
//! ```rust,ignore
//! use vantage_api::{Connect, WsConnector};
//! use url::Url;
//!
//! let connector = WsConnector::new(Url::parse("http://127.0.0.1:9097")?, None);
//! let mut transport = connector.connect("traffic").await?;
//!
//! while let Some(frame) = transport.next_frame().await {
//!     println!("{frame:?}");
//! }
//! ```

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::Error;
use crate::transport::{Connect, Frame, Transport, TransportSender};

// ── WsConnector ──────────────────────────────────────────────────────

/// Opens WebSocket transports against the engine's controller address.
#[derive(Debug, Clone)]
pub struct WsConnector {
    base_url: Url,
    secret: Option<SecretString>,
}

impl WsConnector {
    /// `base_url` is the engine's external controller address, with an
    /// `http`, `https`, `ws` or `wss` scheme.
    pub fn new(base_url: Url, secret: Option<SecretString>) -> Self {
        Self { base_url, secret }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build the WebSocket URL for `stream`.
    ///
    /// `stream` may carry its own query (e.g. `logs?level=info`); the
    /// secret is appended as a `token` query parameter.
    pub fn stream_url(&self, stream: &str) -> Result<Url, Error> {
        let mut url = self.base_url.join(stream.trim_start_matches('/'))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(Error::WebSocketConnect(format!(
                    "unsupported scheme '{other}'"
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| Error::WebSocketConnect(format!("cannot use scheme '{scheme}'")))?;

        if let Some(ref secret) = self.secret {
            url.query_pairs_mut()
                .append_pair("token", secret.expose_secret());
        }

        Ok(url)
    }
}

impl Connect for WsConnector {
    fn connect(&self, stream: &str) -> BoxFuture<'static, Result<Transport, Error>> {
        let url = self.stream_url(stream);
        Box::pin(async move { open(url?).await })
    }
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Perform the handshake and spawn the reader task.
async fn open(url: Url) -> Result<Transport, Error> {
    tracing::info!(url = %redact(&url), "Connecting to WebSocket");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let (ws_stream, _response) = tokio_tungstenite::connect_async(ClientRequestBuilder::new(uri))
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::info!("WebSocket connected");

    let (sender, transport) = Transport::pair();
    tokio::spawn(read_loop(ws_stream, sender));
    Ok(transport)
}

/// Forward frames until the socket drops or the transport is closed.
///
/// Read errors are surfaced in-band as an error-marker text frame, the
/// same way the engine's own clients see them.
async fn read_loop(ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>, sender: TransportSender) {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = sender.closed() => {
                let _ = write.send(tungstenite::Message::Close(None)).await;
                break;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        if !sender.text(text.as_str()) {
                            break;
                        }
                    }
                    Some(Ok(tungstenite::Message::Binary(bytes))) => {
                        if !sender.send(Frame::Binary(bytes.to_vec())) {
                            break;
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(
                                code = %cf.code,
                                reason = %cf.reason,
                                "WebSocket close frame received"
                            );
                        } else {
                            tracing::info!("WebSocket close frame received (no payload)");
                        }
                        sender.send(Frame::Close);
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "WebSocket read failed");
                        sender.send(Frame::error(e));
                        break;
                    }
                    None => {
                        tracing::info!("WebSocket stream ended");
                        sender.send(Frame::Close);
                        break;
                    }
                    Some(Ok(_)) => {
                        // Ping, Pong, raw Frame -- tungstenite answers pings itself
                    }
                }
            }
        }
    }

    tracing::debug!("WebSocket reader exiting");
}

/// Strip the `token` query parameter before logging a URL.
fn redact(url: &Url) -> Url {
    let mut shown = url.clone();
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "token")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        shown.set_query(None);
    } else {
        shown.query_pairs_mut().clear().extend_pairs(kept);
    }
    shown
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn connector(base: &str, secret: Option<&str>) -> WsConnector {
        WsConnector::new(
            Url::parse(base).unwrap(),
            secret.map(|s| SecretString::from(s.to_owned())),
        )
    }

    #[test]
    fn http_base_maps_to_ws() {
        let url = connector("http://127.0.0.1:9097", None)
            .stream_url("traffic")
            .unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:9097/traffic");
    }

    #[test]
    fn https_base_maps_to_wss() {
        let url = connector("https://engine.local", None)
            .stream_url("/memory")
            .unwrap();
        assert_eq!(url.as_str(), "wss://engine.local/memory");
    }

    #[test]
    fn secret_is_appended_as_token() {
        let url = connector("http://127.0.0.1:9097/", Some("s3cret"))
            .stream_url("logs?level=info")
            .unwrap();
        assert_eq!(url.path(), "/logs");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("level".to_owned(), "info".to_owned()),
                ("token".to_owned(), "s3cret".to_owned()),
            ]
        );
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let err = connector("ftp://engine.local", None)
            .stream_url("traffic")
            .unwrap_err();
        assert!(matches!(err, Error::WebSocketConnect(_)));
    }

    #[test]
    fn redact_hides_token() {
        let url = Url::parse("ws://h/logs?level=info&token=abc").unwrap();
        assert_eq!(redact(&url).as_str(), "ws://h/logs?level=info");

        let url = Url::parse("ws://h/traffic?token=abc").unwrap();
        assert_eq!(redact(&url).as_str(), "ws://h/traffic");
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        // Port 9 (discard) on localhost is not expected to speak WebSocket.
        let result = connector("http://127.0.0.1:9", None).connect("traffic").await;
        assert!(matches!(result, Err(Error::WebSocketConnect(_))));
    }
}
