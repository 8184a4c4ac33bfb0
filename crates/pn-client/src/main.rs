//! pinus command-line client
//!
//! Sends one request or notification, or listens for server pushes and
//! reconnects when the connection drops.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pn_client::{Client, ExponentialBackoff};
use pn_core::config::{self, ClientConfig};
use pn_core::emitter::{EVENT_ERROR, EVENT_HEARTBEAT_TIMEOUT, EVENT_KICK};
use pn_core::{ClientError, EventEmitter};

#[derive(Parser)]
#[command(name = "pn-client")]
#[command(about = "Talk to a pinus server from the command line")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server address (host:port), overrides the config file
    #[arg(short, long, env = "PINUS_ADDRESS")]
    address: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a request and print the response
    Request {
        /// Route, e.g. connector.entryHandler.entry
        route: String,
        /// JSON payload
        #[arg(default_value = "{}")]
        payload: String,
    },

    /// Send a notification
    Notify {
        /// Route
        route: String,
        /// JSON payload
        #[arg(default_value = "{}")]
        payload: String,
    },

    /// Print pushes on the given routes until interrupted
    Listen {
        /// Push routes to subscribe to
        #[arg(required = true)]
        routes: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);

    let mut config: ClientConfig = if config_path.exists() {
        config::load_config(&config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        if args.config.is_some() {
            anyhow::bail!("Config file not found: {}", config_path.display());
        }
        ClientConfig::default()
    };

    if let Some(address) = args.address {
        config.address = address;
    }

    match args.command {
        Command::Request { route, payload } => {
            let payload = parse_payload(&payload)?;
            let client = Client::connect(&config)
                .await
                .with_context(|| format!("Failed to connect to {}", config.address))?;

            let response = client
                .request(&route, payload)
                .await
                .with_context(|| format!("Request to '{}' failed", route))?;
            println!("{}", serde_json::to_string_pretty(&response)?);

            client.disconnect().await;
        }

        Command::Notify { route, payload } => {
            let payload = parse_payload(&payload)?;
            let client = Client::connect(&config)
                .await
                .with_context(|| format!("Failed to connect to {}", config.address))?;

            client
                .notify(&route, payload)
                .await
                .with_context(|| format!("Notify to '{}' failed", route))?;

            client.disconnect().await;
        }

        Command::Listen { routes } => listen(&config, &routes).await?,
    }

    Ok(())
}

fn parse_payload(text: &str) -> Result<Value> {
    serde_json::from_str(text).context("Payload is not valid JSON")
}

/// Print pushes, reconnecting with backoff whenever the connection drops
async fn listen(config: &ClientConfig, routes: &[String]) -> Result<()> {
    let mut backoff = ExponentialBackoff::from_config(&config.backoff);

    loop {
        let events = Arc::new(EventEmitter::new());
        for route in routes {
            let name = route.clone();
            events.on(route, move |payload| println!("{} {}", name, payload));
        }
        events.on(EVENT_KICK, |reason| tracing::warn!("Kicked by server: {}", reason));
        events.on(EVENT_HEARTBEAT_TIMEOUT, |_| tracing::warn!("Server stopped answering heartbeats"));
        events.on(EVENT_ERROR, |message| tracing::error!("Session error: {}", message));

        match Client::connect_with_events(config, events).await {
            Ok(client) => {
                backoff.reset();
                tracing::info!("Listening on {} route(s) at {}", routes.len(), config.address);

                tokio::select! {
                    _ = client.closed() => tracing::warn!("Connection lost"),
                    _ = tokio::signal::ctrl_c() => {
                        client.disconnect().await;
                        return Ok(());
                    }
                }
            }
            Err(e @ ClientError::Handshake { .. }) => {
                return Err(e).context("Server rejected the handshake");
            }
            Err(e) => tracing::warn!("Failed to connect to {}: {}", config.address, e),
        }

        let delay = backoff.next_delay();
        tracing::info!("Reconnecting in {:?}", delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}
