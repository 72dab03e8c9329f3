//! WebSocket connection and event loop.
//!
//! This module owns one live signaling socket: it writes outbound frames
//! and forwards decoded inbound signals to a sink channel.
//!
//! # Event Loop
//!
//! The connection spawns a tokio task that handles:
//!
//! - Incoming text frames (decoded into [`Signal`]s)
//! - Outgoing frames queued by [`Connection::send`]
//! - Close detection, reported as a [`LinkClosed`] value

// ============================================================================
// Imports
// ============================================================================

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::Signal;

// ============================================================================
// Types
// ============================================================================

/// Channel the event loop forwards inbound signals into.
pub type InboundSink = mpsc::UnboundedSender<Signal>;

// ============================================================================
// LinkClosed
// ============================================================================

/// How the event loop terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkClosed {
    /// [`Connection::shutdown`] was called or every handle was dropped.
    Local,
    /// The peer closed the socket or the network failed.
    Remote {
        /// Human readable cause.
        reason: String,
    },
}

impl LinkClosed {
    /// Returns `true` if the closure was not requested locally.
    #[inline]
    #[must_use]
    pub fn is_unexpected(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    fn remote(reason: impl Into<String>) -> Self {
        Self::Remote {
            reason: reason.into(),
        }
    }
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Write one text frame.
    Send(String),
    /// Close the socket.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// Handle to a live WebSocket signaling link.
///
/// Cloning is cheap; every clone feeds the same event loop.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync`. [`Connection::send`] never blocks: frames
/// are queued and written by the event loop.
#[derive(Clone)]
pub struct Connection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
}

impl Connection {
    /// Creates a connection from an upgraded WebSocket stream.
    ///
    /// Spawns the event loop task internally. The returned handle resolves
    /// when the loop terminates.
    pub fn new<S>(ws_stream: WebSocketStream<S>, inbound: InboundSink) -> (Self, JoinHandle<LinkClosed>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(Self::run_event_loop(ws_stream, command_rx, inbound));

        (Self { command_tx }, handle)
    }

    /// Queues a signal for sending.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the signal cannot be serialized
    /// - [`Error::ConnectionClosed`] if the event loop has terminated
    pub fn send(&self, signal: &Signal) -> Result<()> {
        let json = signal.encode()?;
        self.command_tx
            .send(ConnectionCommand::Send(json))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Returns `true` once the event loop has terminated.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    /// Closes the socket gracefully.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop<S>(
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        inbound: InboundSink,
    ) -> LinkClosed
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let closed = loop {
            tokio::select! {
                // Incoming frames from the peer
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_incoming_text(&text, &inbound);
                        }

                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "WebSocket closed by remote");
                            break LinkClosed::remote("closed by peer");
                        }

                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            break LinkClosed::remote(e.to_string());
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break LinkClosed::remote("stream ended");
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Commands from the owning handle
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send(json)) => {
                            if let Err(e) = ws_write.send(Message::Text(json.into())).await {
                                warn!(error = %e, "Failed to write frame");
                                break LinkClosed::remote(e.to_string());
                            }
                            trace!("Frame sent");
                        }

                        Some(ConnectionCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break LinkClosed::Local;
                        }

                        None => {
                            debug!("Command channel closed");
                            let _ = ws_write.close().await;
                            break LinkClosed::Local;
                        }
                    }
                }
            }
        };

        debug!(?closed, "Event loop terminated");
        closed
    }

    /// Decodes one text frame and forwards it to the sink.
    fn handle_incoming_text(text: &str, inbound: &InboundSink) {
        match Signal::decode(text) {
            Ok(signal) => {
                trace!(kind = %signal.kind, session = %signal.payload.session_id, "Signal received");
                if inbound.send(signal).is_err() {
                    debug!("Inbound sink dropped, discarding signal");
                }
            }
            Err(e) => warn!(error = %e, "Discarding undecodable frame"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{MaybeTlsStream, accept_async, connect_async};

    use crate::identifiers::{CallId, UserId};
    use crate::protocol::{CallPayload, MediaKind, SignalKind};

    async fn socket_pair() -> (
        WebSocketStream<TcpStream>,
        WebSocketStream<MaybeTlsStream<TcpStream>>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            accept_async(stream).await.unwrap()
        });
        let (client, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        (accept.await.unwrap(), client)
    }

    fn offer() -> Signal {
        Signal::new(
            SignalKind::Offer,
            CallPayload::new(
                CallId::generate(),
                UserId::new("alice"),
                UserId::new("bob"),
                MediaKind::Audio,
            ),
        )
    }

    #[test]
    fn test_link_closed_is_unexpected() {
        assert!(LinkClosed::remote("reset").is_unexpected());
        assert!(!LinkClosed::Local.is_unexpected());
    }

    #[tokio::test]
    async fn test_frames_flow_between_connections() {
        let (server_ws, client_ws) = socket_pair().await;
        let (server_tx, mut server_rx) = mpsc::unbounded_channel();
        let (client_tx, _client_rx) = mpsc::unbounded_channel();

        let (_server, _) = Connection::new(server_ws, server_tx);
        let (client, _) = Connection::new(client_ws, client_tx);

        let signal = offer();
        client.send(&signal).unwrap();

        let received = server_rx.recv().await.unwrap();
        assert_eq!(received, signal);
    }

    #[tokio::test]
    async fn test_local_shutdown_reports_local_and_peer_sees_remote() {
        let (server_ws, client_ws) = socket_pair().await;
        let (server_tx, _server_rx) = mpsc::unbounded_channel();
        let (client_tx, _client_rx) = mpsc::unbounded_channel();

        let (server, server_loop) = Connection::new(server_ws, server_tx);
        let (_client, client_loop) = Connection::new(client_ws, client_tx);

        server.shutdown();

        assert_eq!(server_loop.await.unwrap(), LinkClosed::Local);
        assert!(client_loop.await.unwrap().is_unexpected());
        assert!(server.is_closed());
        assert!(matches!(server.send(&offer()), Err(Error::ConnectionClosed)));
    }
}
