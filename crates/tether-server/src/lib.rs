//! WebSocket server runtime for the Tether protocol.
//!
//! [`serve`] binds a TCP listener and upgrades HTTP requests on a
//! configurable path to WebSocket connections. Every accepted socket gets
//! a fresh connection id and its own task owning one protocol engine and
//! one liveness supervisor; the [`registry::Registry`] maps connection ids
//! to command handles so server-side code can push messages and pings to
//! live peers.
//!
//! Deliveries and lifecycle changes are reported on a single server-wide
//! event channel as [`ServerEvent`]s.

mod connection;
pub mod registry;

pub use registry::{PeerHandle, Registry};

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tokio::sync::mpsc;

use tether_protocol::supervisor::SupervisorConfig;

// ─── Configuration ───────────────────────────────────────────────────────────

/// Server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind_addr: SocketAddr,
    /// HTTP path that upgrades to the protocol WebSocket.
    pub path: String,
    /// Liveness supervision timing, applied to every accepted connection.
    pub supervisor: SupervisorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: ([127, 0, 0, 1], 8080).into(),
            path: "/websocket".to_string(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

// ─── Server Events ───────────────────────────────────────────────────────────

/// What connection tasks report to the embedding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A peer completed the upgrade and was registered.
    PeerJoined { connection_id: String },
    /// A payload arrived intact and in order on this connection.
    Delivered {
        connection_id: String,
        payload: String,
    },
    /// The peer stopped answering pings. The connection is dead and has
    /// been unregistered.
    Breakup { connection_id: String },
    /// The connection closed and has been unregistered.
    Closed { connection_id: String },
}

/// State shared across upgrade handlers.
#[derive(Clone)]
pub(crate) struct AppState {
    pub registry: Registry,
    pub events: mpsc::Sender<ServerEvent>,
    pub supervisor: SupervisorConfig,
}

// ─── Serve ───────────────────────────────────────────────────────────────────

/// Run the server until the listener fails.
///
/// Connections register themselves in `registry` on upgrade and remove
/// themselves on breakup or close, so the registry never holds a handle to
/// a dead task.
pub async fn serve(
    config: ServerConfig,
    registry: Registry,
    events: mpsc::Sender<ServerEvent>,
) -> anyhow::Result<()> {
    let state = AppState {
        registry,
        events,
        supervisor: config.supervisor.clone(),
    };

    let app = Router::new()
        .route(&config.path, get(connection::handler))
        .with_state(state);

    tracing::info!(addr = %config.bind_addr, path = %config.path, "tether-server listening");
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.path, "/websocket");
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(
            config.supervisor.interval,
            std::time::Duration::from_millis(2000)
        );
    }
}
