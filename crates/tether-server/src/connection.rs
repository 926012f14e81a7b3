//! Per-connection WebSocket handling.
//!
//! Each accepted socket runs [`handle_socket`]: mint a connection id,
//! register a command handle, then drive one protocol engine and one
//! liveness supervisor from a single `select!` loop until the peer closes,
//! breaks up, or violates the protocol. The task unregisters itself before
//! exiting, so nothing later can route commands to a dead connection.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use tether_protocol::engine::{Engine, EngineEvent};
use tether_protocol::error::ProtocolError;
use tether_protocol::supervisor::{Supervisor, SupervisorEvent, PING_PAYLOAD};

use crate::registry::{PeerCommand, PeerHandle};
use crate::{AppState, ServerEvent};

type WsSink = SplitSink<WebSocket, Message>;

/// Axum handler — upgrades HTTP to WebSocket.
pub(crate) async fn handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

/// Protocol loop for a single accepted connection.
async fn handle_socket(state: AppState, socket: WebSocket) {
    let connection_id = Uuid::now_v7().to_string();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (tx, mut cmd_rx) = mpsc::channel::<PeerCommand>(64);
    state
        .registry
        .register(connection_id.clone(), PeerHandle::new(tx));
    tracing::info!(connection_id = %connection_id, "peer connected");
    let _ = state
        .events
        .send(ServerEvent::PeerJoined {
            connection_id: connection_id.clone(),
        })
        .await;

    let mut engine = Engine::new();
    let mut supervisor = Supervisor::new(state.supervisor.clone());
    let mut ticker = tokio::time::interval(supervisor.interval());

    let mut broke_up = false;
    loop {
        tokio::select! {
            // Supervisor tick
            _ = ticker.tick() => {
                match supervisor.on_tick() {
                    Some(SupervisorEvent::SendPing) => {
                        if ws_tx.send(Message::Ping(Bytes::from_static(PING_PAYLOAD))).await.is_err() {
                            break;
                        }
                    }
                    Some(SupervisorEvent::Breakup) => {
                        tracing::warn!(connection_id = %connection_id, "peer stopped answering pings");
                        broke_up = true;
                        break;
                    }
                    None => {}
                }
            }

            // Frames from the peer
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match engine.handle_frame(&text) {
                            Ok(()) => {
                                if pump(&connection_id, &mut engine, &mut ws_tx, &state).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(connection_id = %connection_id, error = %e, "dropping frame");
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => supervisor.record_pong(),
                    Some(Ok(Message::Ping(_))) => {} // pong reply handled by axum
                    Some(Ok(Message::Binary(_))) => {
                        let err = ProtocolError::ProtocolViolation("binary frame".into());
                        tracing::error!(connection_id = %connection_id, error = %err, "closing connection");
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::warn!(connection_id = %connection_id, error = %e, "WebSocket read error");
                        break;
                    }
                }
            }

            // Commands from the server side
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(PeerCommand::Send(payload)) => {
                        engine.send(payload);
                        if pump(&connection_id, &mut engine, &mut ws_tx, &state).await.is_err() {
                            break;
                        }
                    }
                    Some(PeerCommand::Ping) => {
                        if ws_tx.send(Message::Ping(Bytes::from_static(PING_PAYLOAD))).await.is_err() {
                            break;
                        }
                    }
                    Some(PeerCommand::Close) | None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }

    // Cleanup: the registry entry goes before the event, so nobody can
    // route a command to this task after hearing it ended.
    supervisor.stop();
    state.registry.unregister(&connection_id);
    let event = if broke_up {
        ServerEvent::Breakup {
            connection_id: connection_id.clone(),
        }
    } else {
        ServerEvent::Closed {
            connection_id: connection_id.clone(),
        }
    };
    let _ = state.events.send(event).await;
    tracing::info!(connection_id = %connection_id, stats = ?engine.stats(), "peer disconnected");
}

/// Write the engine's queued frames and forward its deliveries.
async fn pump(
    connection_id: &str,
    engine: &mut Engine,
    ws_tx: &mut WsSink,
    state: &AppState,
) -> anyhow::Result<()> {
    let events: Vec<EngineEvent> = engine.drain_events().collect();
    for event in events {
        match event {
            EngineEvent::Transmit(frame) => {
                ws_tx.send(Message::Text(frame.into())).await?;
            }
            EngineEvent::Deliver(payload) => {
                let _ = state
                    .events
                    .send(ServerEvent::Delivered {
                        connection_id: connection_id.to_string(),
                        payload,
                    })
                    .await;
            }
        }
    }
    Ok(())
}
