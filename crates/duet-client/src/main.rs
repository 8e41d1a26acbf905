//! Terminal client entry point.
//!
//! Connects to the relay, shows the local id and reads commands from stdin.

mod commands;
mod events;
mod state;

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use duet_core::config::ClientConfig;

use crate::commands::{Command, HELP};
use crate::events::TerminalAppEvents;
use crate::state::build_call_client;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they don't interleave with the prompt output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::from_env()?;
    let client = build_call_client(&config, Arc::new(TerminalAppEvents)).await?;
    println!("Your id: {}", client.handle.local_id());
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(command) => {
                        if commands::dispatch(&client.handle, command).is_break() {
                            break;
                        }
                    }
                    Err(e) => println!("{e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.shutdown().await;
    Ok(())
}
