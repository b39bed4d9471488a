//! Realtime change-feed connection for one remote collection.
//!
//! Connects to the platform's change-feed WebSocket endpoint for a single
//! table and streams parsed change messages through an [`mpsc`] channel,
//! with connection status reported on a [`watch`] channel.
//!
//! One [`RealtimeClient::open`] call is one logical stream. There is no
//! reconnection here: when the connection drops, the task ends after
//! reporting [`FeedStatus::Closed`] or [`FeedStatus::Error`], and the
//! caller decides whether and when to open a fresh connection. The
//! single-connection-per-collection guarantee lives one layer up, in
//! `polis-core`'s multiplexer.
//!
//! # Example
//!
//! ```rust,ignore
//! use polis_api::realtime::{FeedStatus, RealtimeClient};
//!
//! let client = RealtimeClient::new(&platform_url, service_key)?;
//! let mut conn = client.open("citizens");
//!
//! while let Some(change) = conn.events.recv().await {
//!     println!("{:?}: {:?}", change.op, change.row.get("id"));
//! }
//!
//! conn.close();
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use futures_util::StreamExt;

use crate::error::Error;
use crate::rest::Row;

// ── Event channel capacity ───────────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ── Change messages ──────────────────────────────────────────────────

/// The kind of row change a feed frame describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// A parsed change-feed frame: one operation on one row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeMessage {
    pub op: ChangeOp,
    pub row: Row,
}

// ── Connection status ────────────────────────────────────────────────

/// Connection status of one change-feed stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedStatus {
    Connecting,
    Connected,
    /// Clean close (server close frame, stream end, or local cancel).
    Closed,
    /// The connection failed or dropped with an error.
    Error(String),
}

impl FeedStatus {
    /// `true` only for [`FeedStatus::Connected`].
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// `true` once the stream has ended, cleanly or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Error(_))
    }
}

// ── FeedConn ─────────────────────────────────────────────────────────

/// Handle to one live change-feed stream.
///
/// Dropping the handle does not close the stream; call
/// [`close`](Self::close) (or cancel the token) to tear it down.
pub struct FeedConn {
    /// Parsed change messages, in arrival order. Single consumer.
    pub events: mpsc::Receiver<ChangeMessage>,
    /// Connection status; `borrow()` always reports the current value.
    pub status: watch::Receiver<FeedStatus>,
    cancel: CancellationToken,
}

impl FeedConn {
    /// Assemble a feed connection from raw channel halves.
    ///
    /// Lets alternative feed sources (and test doubles) present the same
    /// handle shape as a live WebSocket stream.
    pub fn from_parts(
        events: mpsc::Receiver<ChangeMessage>,
        status: watch::Receiver<FeedStatus>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            events,
            status,
            cancel,
        }
    }

    /// Signal the background task to shut down gracefully.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Token cancelling this connection's read task.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

// ── RealtimeClient ───────────────────────────────────────────────────

/// Factory for change-feed connections against one platform instance.
#[derive(Clone)]
pub struct RealtimeClient {
    ws_base: Url,
    service_key: SecretString,
}

impl RealtimeClient {
    /// Build from the platform URL; derives the `wss://.../realtime/v1/`
    /// base endpoint.
    pub fn new(platform_url: &Url, service_key: SecretString) -> Result<Self, Error> {
        let mut ws_base = platform_url.clone();

        let scheme = if platform_url.scheme() == "http" { "ws" } else { "wss" };
        ws_base
            .set_scheme(scheme)
            .map_err(|()| Error::FeedConnect(format!("cannot derive ws URL from {platform_url}")))?;

        let path = ws_base.path().trim_end_matches('/').to_owned();
        ws_base.set_path(&format!("{path}/realtime/v1/"));

        Ok(Self { ws_base, service_key })
    }

    /// Open one change-feed stream for `table` and spawn its read task.
    ///
    /// Returns immediately; the connection attempt happens asynchronously
    /// and is observable through the returned status channel, which
    /// starts at [`FeedStatus::Connecting`].
    pub fn open(&self, table: &str) -> FeedConn {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(FeedStatus::Connecting);
        let cancel = CancellationToken::new();

        let url = self
            .ws_base
            .join(table)
            .unwrap_or_else(|_| self.ws_base.clone());
        let key = self.service_key.clone();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            read_stream(url, &key, event_tx, status_tx, task_cancel).await;
        });

        FeedConn {
            events: event_rx,
            status: status_rx,
            cancel,
        }
    }
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Connect, read frames until the stream ends, report final status.
async fn read_stream(
    url: Url,
    service_key: &SecretString,
    event_tx: mpsc::Sender<ChangeMessage>,
    status_tx: watch::Sender<FeedStatus>,
    cancel: CancellationToken,
) {
    tracing::info!(url = %url, "connecting to change feed");

    let uri: tungstenite::http::Uri = match url.as_str().parse::<tungstenite::http::Uri>() {
        Ok(uri) => uri,
        Err(e) => {
            let _ = status_tx.send(FeedStatus::Error(format!("invalid feed URL: {e}")));
            return;
        }
    };

    let request = ClientRequestBuilder::new(uri).with_header("apikey", service_key.expose_secret());

    let connect = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            let _ = status_tx.send(FeedStatus::Closed);
            return;
        }
        result = tokio_tungstenite::connect_async(request) => result,
    };

    let ws_stream = match connect {
        Ok((stream, _response)) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "change-feed connect failed");
            let _ = status_tx.send(FeedStatus::Error(e.to_string()));
            return;
        }
    };

    tracing::info!("change feed connected");
    let _ = status_tx.send(FeedStatus::Connected);

    let (_write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = status_tx.send(FeedStatus::Closed);
                return;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        if let Some(change) = parse_frame(&text) {
                            if event_tx.send(change).await.is_err() {
                                // Receiver gone; nothing left to feed.
                                let _ = status_tx.send(FeedStatus::Closed);
                                return;
                            }
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite answers pongs automatically
                        tracing::trace!("change-feed ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(code = %cf.code, reason = %cf.reason, "change feed closed by server");
                        } else {
                            tracing::info!("change feed closed by server (no payload)");
                        }
                        let _ = status_tx.send(FeedStatus::Closed);
                        return;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "change-feed read error");
                        let _ = status_tx.send(FeedStatus::Error(e.to_string()));
                        return;
                    }
                    None => {
                        tracing::info!("change-feed stream ended");
                        let _ = status_tx.send(FeedStatus::Closed);
                        return;
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

// ── Frame parsing ────────────────────────────────────────────────────

/// Parse one text frame into a [`ChangeMessage`].
///
/// Malformed frames (bad JSON, unknown op, missing row) are logged and
/// dropped; one bad frame never takes the stream down.
fn parse_frame(text: &str) -> Option<ChangeMessage> {
    match serde_json::from_str::<ChangeMessage>(text) {
        Ok(change) => Some(change),
        Err(e) => {
            tracing::debug!(error = %e, "dropping malformed change-feed frame");
            None
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_insert_frame() {
        let text = r#"{"op":"insert","row":{"id":"c1","full_name":"A"}}"#;
        let change = parse_frame(text).expect("frame should parse");
        assert_eq!(change.op, ChangeOp::Insert);
        assert_eq!(change.row["id"], "c1");
    }

    #[test]
    fn parse_delete_frame() {
        let text = r#"{"op":"delete","row":{"id":"c2"}}"#;
        let change = parse_frame(text).expect("frame should parse");
        assert_eq!(change.op, ChangeOp::Delete);
    }

    #[test]
    fn malformed_frame_is_dropped() {
        assert!(parse_frame("not json at all").is_none());
        assert!(parse_frame(r#"{"op":"upsert","row":{}}"#).is_none());
        assert!(parse_frame(r#"{"op":"insert"}"#).is_none());
    }

    #[test]
    fn feed_status_predicates() {
        assert!(FeedStatus::Connected.is_connected());
        assert!(!FeedStatus::Connecting.is_connected());
        assert!(FeedStatus::Closed.is_terminal());
        assert!(FeedStatus::Error("boom".into()).is_terminal());
        assert!(!FeedStatus::Connected.is_terminal());
    }

    #[test]
    fn ws_base_derivation() {
        let url = Url::parse("https://office.example.org").expect("url");
        let client = RealtimeClient::new(&url, SecretString::from("k".to_owned())).expect("client");
        assert_eq!(client.ws_base.scheme(), "wss");
        assert_eq!(client.ws_base.path(), "/realtime/v1/");
    }
}
