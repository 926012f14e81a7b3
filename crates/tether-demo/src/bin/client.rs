//! Interactive Tether demo client.
//!
//! Connects to a demo server and reads commands from stdin:
//! - `bye` (or EOF) closes the connection and exits
//! - `ping` sends a manual ping control frame
//! - anything else is sent reliably to the server
//!
//! Deliveries are printed to the console; the program exits when the
//! connection closes or breaks up.

use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use tether_client::{ClientConfig, ClientEvent};
use tether_protocol::supervisor::SupervisorConfig;

/// Tether demo client.
#[derive(Parser, Debug)]
#[command(name = "tether-demo-client", about = "Interactive Tether client")]
struct Cli {
    /// Server URL.
    #[arg(long, default_value = "ws://127.0.0.1:8080/websocket")]
    url: String,

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
    let config = ClientConfig {
        url: cli.url,
        supervisor: SupervisorConfig {
            interval: Duration::from_millis(cli.supervisor_interval_ms),
        },
    };

    let (client, mut events) = tether_client::connect(config).await?;
    println!("Connected");

    let mut console = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = console.next_line() => {
                let Some(line) = line? else {
                    client.close().await?;
                    break;
                };
                match line.trim().to_lowercase().as_str() {
                    "bye" => {
                        client.close().await?;
                        break;
                    }
                    "ping" => client.send_ping().await?,
                    _ => client.send(line).await?,
                }
            }

            event = events.recv() => {
                match event {
                    Some(ClientEvent::Delivered(payload)) => println!("{payload}"),
                    Some(ClientEvent::Breakup) => {
                        eprintln!("Connection broke up");
                        break;
                    }
                    Some(ClientEvent::Closed) | None => {
                        println!("Connection closed");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
