//! Interactive Tether demo server.
//!
//! Listens for protocol connections and reads commands from stdin:
//! - `exit` (or EOF) stops the server
//! - `ping` pings the first registered connection
//! - anything else is sent reliably to the first registered connection
//!
//! Deliveries and connection lifecycle are printed to the console.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use tether_protocol::supervisor::SupervisorConfig;
use tether_server::{Registry, ServerConfig, ServerEvent};

/// Tether demo server.
#[derive(Parser, Debug)]
#[command(name = "tether-demo-server", about = "Interactive Tether server")]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// WebSocket upgrade path.
    #[arg(long, default_value = "/websocket")]
    path: String,

    /// Liveness supervisor interval in milliseconds.
    #[arg(long, default_value_t = 2000)]
    supervisor_interval_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ServerConfig {
        bind_addr: cli.bind,
        path: cli.path,
        supervisor: SupervisorConfig {
            interval: Duration::from_millis(cli.supervisor_interval_ms),
        },
    };

    let registry = Registry::new();
    let (event_tx, mut events) = mpsc::channel::<ServerEvent>(64);
    let server = tokio::spawn(tether_server::serve(config, registry.clone(), event_tx));

    let mut console = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = console.next_line() => {
                let Some(line) = line? else { break };
                match line.trim().to_lowercase().as_str() {
                    "exit" => break,
                    "ping" => match registry.first() {
                        Some((id, peer)) => {
                            tracing::info!(connection_id = %id, "pinging");
                            peer.ping().await?;
                        }
                        None => println!("no connections"),
                    },
                    _ => match registry.first() {
                        Some((_, peer)) => peer.send(line).await?,
                        None => println!("no connections"),
                    },
                }
            }

            event = events.recv() => {
                match event {
                    Some(ServerEvent::PeerJoined { connection_id }) => {
                        println!("Connection {connection_id} open");
                    }
                    Some(ServerEvent::Delivered { connection_id, payload }) => {
                        println!("Received message on connection {connection_id}:");
                        println!("{payload}");
                    }
                    Some(ServerEvent::Breakup { connection_id }) => {
                        eprintln!("Connection of {connection_id} broke up");
                    }
                    Some(ServerEvent::Closed { connection_id }) => {
                        println!("Connection {connection_id} closed");
                    }
                    None => break,
                }
            }
        }
    }

    server.abort();
    tracing::info!("server stopped");
    Ok(())
}
