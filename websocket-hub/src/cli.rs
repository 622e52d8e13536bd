use std::{net::SocketAddr, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::config::{DEFAULT_PATH, HubConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the hub, accepting WebSocket connections and rebroadcasting messages.
    Serve(ServeArgs),
    /// Connect to a hub and exchange messages from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address the hub should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// HTTP path that upgrades to WebSocket.
    #[arg(long, default_value = DEFAULT_PATH)]
    pub path: String,

    /// Transport write buffer size in bytes.
    #[arg(long, default_value_t = 1024)]
    pub write_buffer_size: usize,

    /// Milliseconds a single client write may take before that client is dropped.
    #[arg(long, default_value_t = 5000)]
    pub write_timeout_ms: u64,
}

impl From<&ServeArgs> for HubConfig {
    fn from(args: &ServeArgs) -> Self {
        Self {
            write_buffer_size: args.write_buffer_size,
            write_timeout: Duration::from_millis(args.write_timeout_ms),
            path: args.path.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// WebSocket URL of the hub.
    #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
    pub server: String,

    /// Send lines as structured (JSON) broadcasts instead of plain text.
    #[arg(long)]
    pub structured: bool,
}
