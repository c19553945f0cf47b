//! `chat-server <port>`: accept chat clients and broadcast every message to
//! all of them, sender included. Runs until ctrl-c.

use anyhow::Result;
use clap::Parser;
use tracing::info;

use length_header_chat::{cli::ServerArgs, server};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    info!(pid = std::process::id(), "starting");

    let args = ServerArgs::parse();
    let server = server::start(args.config()).await?;
    info!("chat server listening on {}", server.local_addr());

    server.run_until_ctrl_c().await
}
