//! WebSocket client runtime for the Tether protocol.
//!
//! [`connect`] performs the WebSocket handshake and spawns one connection
//! task that owns a [`tether_protocol::engine::Engine`] and a
//! [`tether_protocol::supervisor::Supervisor`]. The task is the engine's
//! single consumer: inbound frames, supervisor ticks and application
//! commands are serialized through one `select!` loop, so the protocol
//! state needs no locking.
//!
//! The application talks to the task through a [`ClientHandle`] (commands
//! in) and an mpsc receiver of [`ClientEvent`]s (deliveries and lifecycle
//! out). There is no reconnection logic; a closed or broken connection is
//! reported once and the task exits.

use anyhow::Context;
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use tether_protocol::engine::{Engine, EngineEvent};
use tether_protocol::error::ProtocolError;
use tether_protocol::supervisor::{Supervisor, SupervisorConfig, SupervisorEvent, PING_PAYLOAD};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

// ─── Configuration ───────────────────────────────────────────────────────────

/// Client connection settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL, `ws://` or `wss://`.
    pub url: String,
    /// Liveness supervision timing for this connection.
    pub supervisor: SupervisorConfig,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        ClientConfig {
            url: url.into(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

// ─── Events & Commands ───────────────────────────────────────────────────────

/// What the connection task reports to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A payload arrived intact and in order.
    Delivered(String),
    /// The server stopped answering pings. Reported once; the connection
    /// is dead.
    Breakup,
    /// The connection closed (locally requested, server close frame, or
    /// transport error).
    Closed,
}

/// Commands the handle forwards to the connection task.
#[derive(Debug)]
enum Command {
    Send(String),
    Ping,
    Close,
}

// ─── Handle ──────────────────────────────────────────────────────────────────

/// Application-side handle to one connection.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl ClientHandle {
    /// Queue a payload for reliable delivery.
    pub async fn send(&self, payload: impl Into<String>) -> anyhow::Result<()> {
        self.command(Command::Send(payload.into())).await
    }

    /// Send a manual ping control frame, outside the supervisor's schedule.
    pub async fn send_ping(&self) -> anyhow::Result<()> {
        self.command(Command::Ping).await
    }

    /// Close the connection with a close frame.
    pub async fn close(&self) -> anyhow::Result<()> {
        self.command(Command::Close).await
    }

    async fn command(&self, command: Command) -> anyhow::Result<()> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!("connection task stopped"))
    }
}

// ─── Connect ─────────────────────────────────────────────────────────────────

/// Connect to a Tether server and spawn the connection task.
///
/// Returns the command handle and the event receiver. Establishment
/// failures (bad scheme, refused connection, failed upgrade) surface here;
/// the protocol engine never starts for a connection that did not open.
pub async fn connect(
    config: ClientConfig,
) -> anyhow::Result<(ClientHandle, mpsc::Receiver<ClientEvent>)> {
    validate_url(&config.url)?;

    let (ws, _response) = tokio_tungstenite::connect_async(config.url.as_str())
        .await
        .with_context(|| format!("connecting to {}", config.url))?;
    tracing::info!(url = %config.url, "WebSocket connected");

    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(64);
    let supervisor = Supervisor::new(config.supervisor);
    tokio::spawn(run_connection(ws, supervisor, cmd_rx, event_tx));

    Ok((ClientHandle { cmd_tx }, event_rx))
}

/// Only WS(S) is supported.
fn validate_url(url: &str) -> anyhow::Result<()> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(())
    } else {
        anyhow::bail!("unsupported URL scheme in {url:?}: only ws:// and wss:// are supported")
    }
}

// ─── Connection Task ─────────────────────────────────────────────────────────

async fn run_connection(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut supervisor: Supervisor,
    mut cmd_rx: mpsc::Receiver<Command>,
    event_tx: mpsc::Sender<ClientEvent>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut engine = Engine::new();
    // The interval's first tick completes immediately, so the first round
    // pings right away and a silent peer is reported after one interval.
    let mut ticker = tokio::time::interval(supervisor.interval());

    loop {
        tokio::select! {
            // Supervisor tick
            _ = ticker.tick() => {
                match supervisor.on_tick() {
                    Some(SupervisorEvent::SendPing) => {
                        if ws_tx.send(Message::Ping(Bytes::from_static(PING_PAYLOAD))).await.is_err() {
                            let _ = event_tx.send(ClientEvent::Closed).await;
                            break;
                        }
                    }
                    Some(SupervisorEvent::Breakup) => {
                        tracing::warn!("server stopped answering pings, reporting breakup");
                        let _ = event_tx.send(ClientEvent::Breakup).await;
                        break;
                    }
                    None => {}
                }
            }

            // Frames from the server
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match engine.handle_frame(&text) {
                            Ok(()) => {
                                if pump(&mut engine, &mut ws_tx, &event_tx).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => tracing::warn!(error = %e, "dropping frame"),
                        }
                    }
                    Some(Ok(Message::Pong(_))) => supervisor.record_pong(),
                    Some(Ok(Message::Ping(_))) => {} // pong reply handled by tungstenite
                    Some(Ok(Message::Binary(_))) => {
                        let err = ProtocolError::ProtocolViolation("binary frame".into());
                        tracing::error!(error = %err, "closing connection");
                        let _ = ws_tx.send(Message::Close(None)).await;
                        let _ = event_tx.send(ClientEvent::Closed).await;
                        break;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("server closed connection");
                        let _ = event_tx.send(ClientEvent::Closed).await;
                        break;
                    }
                    Some(Ok(_)) => {} // raw frames are not surfaced by tungstenite
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "WebSocket read error");
                        let _ = event_tx.send(ClientEvent::Closed).await;
                        break;
                    }
                }
            }

            // Commands from the application
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(payload)) => {
                        engine.send(payload);
                        if pump(&mut engine, &mut ws_tx, &event_tx).await.is_err() {
                            break;
                        }
                    }
                    Some(Command::Ping) => {
                        if ws_tx.send(Message::Ping(Bytes::from_static(PING_PAYLOAD))).await.is_err() {
                            let _ = event_tx.send(ClientEvent::Closed).await;
                            break;
                        }
                    }
                    Some(Command::Close) | None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        let _ = event_tx.send(ClientEvent::Closed).await;
                        break;
                    }
                }
            }
        }
    }

    supervisor.stop();
    tracing::debug!(stats = ?engine.stats(), "connection task exiting");
}

/// Write the engine's queued frames and forward its deliveries.
async fn pump(
    engine: &mut Engine,
    ws_tx: &mut WsSink,
    event_tx: &mpsc::Sender<ClientEvent>,
) -> anyhow::Result<()> {
    let events: Vec<EngineEvent> = engine.drain_events().collect();
    for event in events {
        match event {
            EngineEvent::Transmit(frame) => {
                ws_tx.send(Message::Text(frame.into())).await?;
            }
            EngineEvent::Deliver(payload) => {
                event_tx
                    .send(ClientEvent::Delivered(payload))
                    .await
                    .map_err(|_| anyhow::anyhow!("event receiver dropped"))?;
            }
        }
    }
    Ok(())
}
