//! # tether-console
//!
//! Console-side command channel binary. Connects to the backend, serves the
//! built-in UI methods and legacy events, and runs until ctrl-c or until the
//! connection gives up.

#![deny(unsafe_code)]

mod handlers;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tether_client::{Connection, ConnectionConfig, ConnectionState, ConnectionStatus, WsConnector};
use tether_rpc::{CommandBus, HandlerRegistry};
use tether_settings::ChannelSettings;
use tokio::sync::watch;

use crate::handlers::UiState;

/// Tether console.
#[derive(Parser, Debug)]
#[command(name = "tether-console", about = "Tether command channel console")]
struct Cli {
    /// Backend WebSocket URL (overrides settings).
    #[arg(long)]
    url: Option<String>,

    /// Bearer token presented on connect.
    #[arg(long, env = "TETHER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Settings file (defaults to `~/.tether/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,

    /// Route the UI starts on.
    #[arg(long, default_value = "/")]
    route: String,
}

impl Cli {
    fn load_settings(&self) -> Result<ChannelSettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(tether_settings::settings_path);
        let mut settings = tether_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(url) = &self.url {
            settings.url.clone_from(url);
        }
        if let Some(level) = &self.log_level {
            settings.log_level.clone_from(level);
        }
        Ok(settings)
    }
}

/// Terminal means the supervisor stopped on its own and won't retry.
fn gave_up(status: &ConnectionStatus) -> bool {
    status.state == ConnectionState::Disconnected && status.last_error.is_some()
}

async fn log_status(mut rx: watch::Receiver<ConnectionStatus>) {
    while rx.changed().await.is_ok() {
        let status = rx.borrow_and_update().clone();
        match status.state {
            ConnectionState::Connected => tracing::info!("connected"),
            ConnectionState::Reconnecting => tracing::warn!(
                attempts = status.reconnect_attempts,
                error = status.last_error.as_deref().unwrap_or_default(),
                "reconnecting"
            ),
            ConnectionState::Disconnected if status.has_auth_error => tracing::error!(
                error = status.last_error.as_deref().unwrap_or_default(),
                "backend rejected credentials"
            ),
            state => tracing::debug!(?state, "connection state changed"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;

    if args.json_logs {
        tether_core::logging::init_json_subscriber(&settings.log_level);
    } else {
        tether_core::logging::init_subscriber(&settings.log_level);
    }

    let Some(token) = args.token.as_deref().filter(|t| !t.is_empty()) else {
        bail!("No token supplied (use --token or TETHER_TOKEN)");
    };

    let registry = Arc::new(HandlerRegistry::new());
    let commands = Arc::new(CommandBus::new());
    let state = Arc::new(UiState::new(args.route.as_str()));
    handlers::register_all(&registry, &commands, &state);

    let connection = Connection::with_handlers(
        ConnectionConfig::from(&settings),
        Arc::new(WsConnector::new()),
        registry.clone(),
        commands,
    );
    drop(tokio::spawn(log_status(connection.subscribe())));

    tracing::info!(
        url = %settings.url,
        methods = registry.methods().len(),
        "starting command channel"
    );
    connection.connect(Some(token));

    let mut status = connection.subscribe();
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for ctrl-c")?;
            tracing::info!("Shutting down...");
        }
        res = status.wait_for(gave_up) => {
            let reason = res
                .ok()
                .and_then(|s| s.last_error.clone())
                .unwrap_or_default();
            connection.disconnect().await;
            bail!("Command channel stopped: {reason}");
        }
    }

    connection.disconnect().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
