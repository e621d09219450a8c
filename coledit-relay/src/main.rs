//! coledit-relay: local document channel relay for ColEdit development.
//!
//! Serves `ws://{bind}{path}/{noteId}` with the same JSON protocol the
//! production channel speaks, so sessions can be run against a laptop.

use clap::Parser;
use log::info;

use coledit_sync::{RelayConfig, RelayServer};

#[derive(Parser, Debug)]
#[command(name = "coledit-relay")]
#[command(about = "Reference relay for ColEdit note channels")]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:9090")]
    bind: String,

    /// Per-note broadcast buffer, in frames
    #[arg(short, long, default_value_t = 256)]
    capacity: usize,

    /// Path prefix under which notes are addressed
    #[arg(long, default_value = "/wsapp/document")]
    path: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = RelayConfig {
        bind_addr: args.bind,
        broadcast_capacity: args.capacity,
        document_path: args.path,
    };

    info!("Starting ColEdit relay...");
    RelayServer::new(config).run().await?;
    Ok(())
}
