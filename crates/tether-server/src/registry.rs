//! Connection registry.
//!
//! Maps connection ids (UUIDv7 strings minted at upgrade time) to handles
//! for the per-connection tasks. Shared across upgrade handlers and the
//! embedding application; connection tasks register on join and remove
//! themselves on breakup or close.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

/// Commands a connection task accepts from the server side.
#[derive(Debug)]
pub(crate) enum PeerCommand {
    Send(String),
    Ping,
    Close,
}

// ─── Peer Handle ─────────────────────────────────────────────────────────────

/// Server-side handle to one live connection.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    tx: mpsc::Sender<PeerCommand>,
}

impl PeerHandle {
    pub(crate) fn new(tx: mpsc::Sender<PeerCommand>) -> Self {
        PeerHandle { tx }
    }

    /// Queue a payload for reliable delivery to this peer.
    pub async fn send(&self, payload: impl Into<String>) -> anyhow::Result<()> {
        self.command(PeerCommand::Send(payload.into())).await
    }

    /// Send a manual ping control frame to this peer.
    pub async fn ping(&self) -> anyhow::Result<()> {
        self.command(PeerCommand::Ping).await
    }

    /// Close this connection with a close frame.
    pub async fn close(&self) -> anyhow::Result<()> {
        self.command(PeerCommand::Close).await
    }

    async fn command(&self, command: PeerCommand) -> anyhow::Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!("connection task stopped"))
    }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Shared map of live connections, keyed by connection id.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    inner: Arc<DashMap<String, PeerHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a live connection. Called by the connection task on upgrade.
    pub fn register(&self, connection_id: impl Into<String>, handle: PeerHandle) {
        self.inner.insert(connection_id.into(), handle);
    }

    /// Remove a connection. Called by the connection task on breakup or
    /// close; returns whether an entry was present.
    pub fn unregister(&self, connection_id: &str) -> bool {
        self.inner.remove(connection_id).is_some()
    }

    /// Look up a live connection by id.
    pub fn lookup(&self, connection_id: &str) -> Option<PeerHandle> {
        self.inner.get(connection_id).map(|entry| entry.clone())
    }

    /// Some live connection, in unspecified map iteration order. For ad hoc
    /// diagnostics and console demos only; do not rely on which connection
    /// this picks.
    pub fn first(&self) -> Option<(String, PeerHandle)> {
        self.inner
            .iter()
            .next()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
