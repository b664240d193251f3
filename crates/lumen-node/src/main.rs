//! Runs one Lumen light client session against the configured node and
//! prints every verified update.
//!
//! ```text
//! RUST_LOG=lumen_p2p=debug lumen-node lumen.json
//! ```

use anyhow::{bail, Context, Result};
use lumen_p2p::{ClientConfig, ClientEvent, LightClient, MemoryStore};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("invalid RUST_LOG filter")?;
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(())
}

fn print_event(event: &ClientEvent) {
    match event {
        ClientEvent::HeadUpdated(header) => {
            println!("head     #{} 0x{}", header.height, header.hash_hex());
        }
        ClientEvent::AccountUpdated(state) => {
            println!(
                "account  0x{} nonce={} balance=0x{}",
                hex::encode(state.address),
                state.nonce,
                state.balance_hex()
            );
        }
        ClientEvent::SendSucceeded {
            send_id,
            transaction,
        } => {
            println!("sent     #{send_id} 0x{}", hex::encode(transaction.hash));
        }
        ClientEvent::SendFailed { send_id, error } => {
            println!("failed   #{send_id} {error}");
        }
        ClientEvent::Disconnected { reason } => {
            println!("closed   {reason}");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let Some(path) = std::env::args().nth(1) else {
        bail!("usage: lumen-node <config.json>");
    };
    let config = ClientConfig::load(&path).with_context(|| format!("loading {path}"))?;
    info!(node = %config.node.address(), "Connecting");

    let mut client = LightClient::connect(&config, MemoryStore::new())
        .await
        .context("failed to start light client")?;

    loop {
        tokio::select! {
            event = client.next_event() => match event {
                Some(event) => {
                    print_event(&event);
                    if matches!(event, ClientEvent::Disconnected { .. }) {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, disconnecting");
                if client.disconnect().await.is_err() {
                    warn!("Session already closed");
                    break;
                }
            }
        }
    }

    let store = client.join().await?;
    info!(headers = store.header_count(), "Session finished");
    Ok(())
}
