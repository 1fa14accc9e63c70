//! Event stream transport.
//!
//! A [`Transport`] turns a session into a live [`Connection`]: it fetches a
//! one-shot ticket bound to the session token and opens
//! `wss://<host>/stream/<ticket>/wss`. The channel is receive-only; the
//! connection surfaces `open`, `message`, `close` and `error` as
//! [`TransportEvent`]s and can be closed with an application close code.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMsg;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::api::OrionApi;
use crate::endpoints::Endpoints;
use crate::error::OrionError;
use crate::session::Session;

/// Close code this client uses for a voluntary close. Any other close code
/// means the server or the network ended the stream.
pub const DELIBERATE_CLOSE_CODE: u16 = 4158;

/// Upper bound on the websocket handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Code reported when the stream ends without a close frame.
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(String),
    Close { code: u16, was_clean: bool },
    Error(String),
}

impl TransportEvent {
    /// True for a close initiated by this client.
    pub fn is_deliberate_close(&self) -> bool {
        matches!(self, TransportEvent::Close { code, .. } if *code == DELIBERATE_CLOSE_CODE)
    }
}

/// The open transport handle. Owned by exactly one session; dropping it
/// tears the underlying socket task down.
#[derive(Debug)]
pub struct Connection {
    events: UnboundedReceiver<TransportEvent>,
    close_tx: UnboundedSender<u16>,
    task: Option<JoinHandle<()>>,
}

impl Connection {
    /// Assemble a connection from its parts. `close_tx` receives the close
    /// code when the owner closes; `task` is aborted on drop.
    pub fn new(
        events: UnboundedReceiver<TransportEvent>,
        close_tx: UnboundedSender<u16>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self { events, close_tx, task }
    }

    /// Next event, `None` once the socket task is gone.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Ask the socket to close with `code`.
    pub fn close(&self, code: u16) {
        if self.close_tx.send(code).is_err() {
            debug!(code, "close requested on an already finished connection");
        }
    }

    /// Close with `code` and wait (bounded) for the socket task to finish.
    pub async fn shutdown(mut self, code: u16) {
        self.close(code);
        if let Some(task) = self.task.take() {
            let abort = task.abort_handle();
            if tokio::time::timeout(Duration::from_secs(2), task).await.is_err() {
                warn!(code, "socket task did not finish after close, aborting");
                abort.abort();
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a fresh connection for `session`. Every call uses a new ticket.
    async fn connect(&self, session: &Session) -> Result<Connection, OrionError>;
}

/// Websocket transport against the Orion event stream.
#[derive(Clone)]
pub struct WsTransport {
    api: Arc<dyn OrionApi>,
    endpoints: Endpoints,
    handshake_timeout: Duration,
}

impl WsTransport {
    pub fn new(api: Arc<dyn OrionApi>, endpoints: Endpoints) -> Self {
        Self { api, endpoints, handshake_timeout: HANDSHAKE_TIMEOUT }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, session: &Session) -> Result<Connection, OrionError> {
        let ticket = self.api.ticket(session).await?;
        let url = self.endpoints.stream_url(&ticket);
        let (stream, _resp) = match tokio::time::timeout(self.handshake_timeout, connect_async(url.as_str())).await {
            Ok(connected) => connected?,
            Err(_) => {
                warn!(timeout_ms = self.handshake_timeout.as_millis() as u64, "event stream handshake timed out");
                return Err(OrionError::WebSocket("handshake timed out".into()));
            }
        };
        info!(user_id = %session.user_id, "event stream connected");

        let (events_tx, events_rx) = unbounded_channel();
        let (close_tx, close_rx) = unbounded_channel();
        let _ = events_tx.send(TransportEvent::Open);
        let task = tokio::spawn(pump(stream, events_tx, close_rx));
        Ok(Connection::new(events_rx, close_tx, Some(task)))
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Owns the socket: forwards inbound frames as events and performs the
/// close handshake when asked to.
async fn pump(
    stream: WsStream,
    events_tx: UnboundedSender<TransportEvent>,
    mut close_rx: UnboundedReceiver<u16>,
) {
    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            requested = close_rx.recv() => {
                let code = requested.unwrap_or(DELIBERATE_CLOSE_CODE);
                let frame = CloseFrame { code: CloseCode::from(code), reason: "client closing".into() };
                if let Err(e) = write.send(WsMsg::Close(Some(frame))).await {
                    debug!(error = %e, "close frame could not be sent");
                }
                let _ = events_tx.send(TransportEvent::Close { code, was_clean: true });
                break;
            }
            frame = read.next() => match frame {
                Some(Ok(WsMsg::Text(txt))) => {
                    let _ = events_tx.send(TransportEvent::Message(txt.as_str().to_owned()));
                }
                Some(Ok(WsMsg::Binary(bytes))) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    let _ = events_tx.send(TransportEvent::Message(text));
                }
                Some(Ok(WsMsg::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code)).unwrap_or(1005);
                    let _ = events_tx.send(TransportEvent::Close { code, was_clean: true });
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events_tx.send(TransportEvent::Error(e.to_string()));
                    break;
                }
                None => {
                    let _ = events_tx.send(TransportEvent::Close { code: ABNORMAL_CLOSE_CODE, was_clean: false });
                    break;
                }
            }
        }
    }
}
