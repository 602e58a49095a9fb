//! Conversation socket lifecycle.
//!
//! [`ConnectionManager`] owns at most one socket.  Each `connect` spawns a
//! link task that performs the handshake under a bounded wait and then
//! pumps frames in both directions until either side closes.  The task is
//! the only place that emits `Disconnected`, and it does so exactly once on
//! its way out, whatever the reason.
//!
//! ```text
//! connect(id) ─▶ spawn link task
//!                 ├─ handshake ──timeout──▶ ConnectionError(Timeout) ┐
//!                 ├─ handshake ──failure──▶ ConnectionError(..)      │
//!                 └─ Connected ─▶ pump ─┬─ inbound Text ─▶ ServerMessage
//!                                       ├─ outbound Frame ─▶ socket  │
//!                                       └─ close / error ────────────┴─▶ Disconnected
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::ServerConfig;
use crate::session::{ConnectionId, EventSender, SessionEvent};

use super::protocol::{CloseInfo, ConnectionError, Endpoint, OutboundMessage, ServerMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ---------------------------------------------------------------------------
// ConversationLink trait
// ---------------------------------------------------------------------------

/// The socket operations the session issues.
///
/// Implementations report every outcome through the event channel and
/// never return errors to the caller.
pub trait ConversationLink: Send {
    /// Open a socket for `endpoint`.  Emits `Connected` or
    /// `ConnectionError`, and eventually exactly one `Disconnected`.
    fn connect(&mut self, connection: ConnectionId, endpoint: Endpoint);

    /// Send one frame.  Emits `ConnectionError(NotConnected)` when
    /// `connection` is not the open socket.
    fn send(&mut self, connection: ConnectionId, message: OutboundMessage);

    /// Close the socket.  Safe to call when nothing is open.
    fn close(&mut self);
}

// ---------------------------------------------------------------------------
// ConnectionManager
// ---------------------------------------------------------------------------

enum Outbound {
    Frame(String),
    Close,
}

struct LinkHandle {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
}

/// WebSocket client for the conversation server.
///
/// Must be used from within a tokio runtime.
pub struct ConnectionManager {
    config: ServerConfig,
    events: EventSender,
    link: Option<LinkHandle>,
}

impl ConnectionManager {
    pub fn new(config: ServerConfig, events: EventSender) -> Self {
        Self {
            config,
            events,
            link: None,
        }
    }
}

impl ConversationLink for ConnectionManager {
    fn connect(&mut self, connection: ConnectionId, endpoint: Endpoint) {
        if let Some(stale) = self.link.take() {
            log::warn!(
                "connection: connect({connection}) while {} outstanding, closing it",
                stale.id
            );
            let _ = stale.outbound.send(Outbound::Close);
        }

        let url = self
            .config
            .endpoint_url(endpoint.session_id.get(), endpoint.conversation_id.get());
        log::info!("connection: opening {url} ({connection})");

        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        self.link = Some(LinkHandle {
            id: connection,
            outbound: tx,
            open: Arc::clone(&open),
        });

        tokio::spawn(run_link(
            connection,
            url,
            self.config.connect_timeout(),
            rx,
            open,
            self.events.clone(),
        ));
    }

    fn send(&mut self, connection: ConnectionId, message: OutboundMessage) {
        let frame = match message.to_json() {
            Ok(frame) => frame,
            Err(error) => {
                self.events
                    .emit(SessionEvent::ConnectionError { connection, error });
                return;
            }
        };

        let delivered = match &self.link {
            Some(link) if link.id == connection && link.open.load(Ordering::SeqCst) => {
                link.outbound.send(Outbound::Frame(frame)).is_ok()
            }
            _ => false,
        };

        if delivered {
            log::debug!("connection: queued frame on {connection}");
        } else {
            log::warn!("connection: send on {connection} while not connected");
            self.events.emit(SessionEvent::ConnectionError {
                connection,
                error: ConnectionError::NotConnected,
            });
        }
    }

    fn close(&mut self) {
        if let Some(link) = self.link.take() {
            log::info!("connection: closing {}", link.id);
            // The task may already be gone after a remote close.
            let _ = link.outbound.send(Outbound::Close);
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Link task
// ---------------------------------------------------------------------------

async fn run_link(
    id: ConnectionId,
    url: String,
    timeout: Duration,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    open: Arc<AtomicBool>,
    events: EventSender,
) {
    let close = match handshake(&url, timeout, &mut outbound).await {
        Ok(Some(stream)) => {
            open.store(true, Ordering::SeqCst);
            events.emit(SessionEvent::Connected { connection: id });
            pump(id, stream, &mut outbound, &events).await
        }
        Ok(None) => {
            log::debug!("connection: {id} closed before the handshake finished");
            CloseInfo::local()
        }
        Err(error) => {
            log::warn!("connection: {id} failed: {error}");
            let close = match error {
                ConnectionError::Timeout(_) => CloseInfo::local(),
                ref other => CloseInfo::remote(None, other.to_string()),
            };
            events.emit(SessionEvent::ConnectionError {
                connection: id,
                error,
            });
            close
        }
    };

    open.store(false, Ordering::SeqCst);
    log::info!(
        "connection: {id} disconnected (code {:?}, local {})",
        close.code,
        close.initiated_locally
    );
    events.emit(SessionEvent::Disconnected {
        connection: id,
        close,
    });
}

/// Perform the opening handshake.  `Ok(None)` means `close()` was called
/// while it was still in progress.
async fn handshake(
    url: &str,
    timeout: Duration,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
) -> Result<Option<WsStream>, ConnectionError> {
    let attempt = tokio::time::timeout(timeout, connect_async(url));
    tokio::pin!(attempt);

    loop {
        tokio::select! {
            result = &mut attempt => {
                return match result {
                    Err(_elapsed) => Err(ConnectionError::Timeout(timeout.as_secs())),
                    Ok(Err(e)) => Err(classify(e)),
                    Ok(Ok((stream, _response))) => Ok(Some(stream)),
                };
            }
            cmd = outbound.recv() => match cmd {
                Some(Outbound::Frame(_)) => {
                    log::warn!("connection: frame queued before open, dropped");
                }
                Some(Outbound::Close) | None => return Ok(None),
            }
        }
    }
}

/// Move frames until one side closes.  Returns how the socket ended.
async fn pump(
    id: ConnectionId,
    stream: WsStream,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    events: &EventSender,
) -> CloseInfo {
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            cmd = outbound.recv() => match cmd {
                Some(Outbound::Frame(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        return fail(id, events, e);
                    }
                }
                Some(Outbound::Close) | None => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: String::new().into(),
                    };
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        log::debug!("connection: close frame on {id} not delivered: {e}");
                    }
                    return CloseInfo::local();
                }
            },
            msg = source.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    events.emit(SessionEvent::ServerMessage {
                        connection: id,
                        message: ServerMessage::new(text.as_str()),
                    });
                }
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => events.emit(SessionEvent::ServerMessage {
                        connection: id,
                        message: ServerMessage::new(text),
                    }),
                    Err(_) => log::warn!("connection: non-UTF-8 binary frame on {id} dropped"),
                },
                Some(Ok(Message::Close(frame))) => {
                    return match frame {
                        Some(frame) => {
                            CloseInfo::remote(Some(u16::from(frame.code)), frame.reason.as_str())
                        }
                        None => CloseInfo::remote(None, ""),
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return fail(id, events, e),
                None => return CloseInfo::remote(None, "stream ended"),
            }
        }
    }
}

fn fail(id: ConnectionId, events: &EventSender, e: tungstenite::Error) -> CloseInfo {
    let reason = e.to_string();
    log::warn!("connection: transport error on {id}: {reason}");
    events.emit(SessionEvent::ConnectionError {
        connection: id,
        error: ConnectionError::Transport(reason.clone()),
    });
    CloseInfo::remote(None, reason)
}

fn classify(e: tungstenite::Error) -> ConnectionError {
    match e {
        tungstenite::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
            ConnectionError::Refused(io.to_string())
        }
        tungstenite::Error::Http(response) => {
            ConnectionError::Refused(format!("HTTP {}", response.status()))
        }
        other => ConnectionError::Transport(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
