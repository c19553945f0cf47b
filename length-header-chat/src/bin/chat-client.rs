//! `chat-client <host> <port>`: send each stdin line as `<name>>> <line>` and
//! print every message the server broadcasts.
//!
//! Logs go to stderr so stdout carries only chat traffic.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::warn;

use length_header_chat::{
    cli::ClientArgs,
    client::{self, MessageClient},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = ClientArgs::parse();
    let name = match args.name.clone() {
        Some(name) => name,
        None => tokio::task::spawn_blocking(prompt_name)
            .await
            .context("name prompt panicked")??,
    };

    let client = client::connect(args.config(), |message| {
        println!("{}", String::from_utf8_lossy(&message));
    });

    // stdin is read on a blocking thread; sends cross over to the runtime
    // through the client's mailbox.
    let sender = client.client();
    tokio::task::spawn_blocking(move || forward_stdin(&sender, &name))
        .await
        .context("stdin reader panicked")??;

    client.shutdown().await
}

fn prompt_name() -> Result<String> {
    print!("Please input your name: ");
    io::stdout().flush()?;

    let mut name = String::new();
    if io::stdin().read_line(&mut name)? == 0 {
        bail!("no name given");
    }
    let name = name.trim();
    if name.is_empty() {
        bail!("name cannot be empty");
    }
    Ok(name.to_string())
}

fn forward_stdin(client: &MessageClient, name: &str) -> Result<()> {
    for line in io::stdin().lock().lines() {
        let line = line.context("failed to read stdin")?;
        if let Err(err) = client.send(format!("{name}>> {line}").as_bytes()) {
            warn!(error = %err, "message not sent");
        }
    }
    Ok(())
}
