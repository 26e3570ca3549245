//! ccshuffled - shuffle-round scheduler daemon
//!
//! Runs audience-voted effect rounds against a live game session:
//! - Session discovery and menu tracking (HTTP + push channel)
//! - The round loop (sample, vote, resolve, apply)
//! - IPC server for operator tools and the chat bridge
//!
//! Storage locations:
//! - Linux: ~/.local/share/ccshuffle/
//! - Windows: %APPDATA%\ccshuffle\
//! - MacOS: ~/Library/Application Support/ccshuffle/

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod backend;
mod chat;
mod config;
mod effects;
mod ipc;
mod paths;
mod push;
mod rounds;
mod session;

use backend::HttpBackend;
use config::{Credentials, DaemonConfig};
use paths::AppPaths;
use session::Daemon;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let paths = AppPaths::new()?;
    info!("Data directory: {:?}", paths.data_dir());
    let config = DaemonConfig::load(&paths.config_file())?;
    info!("Config file: {:?}", paths.config_file());

    let credentials = Credentials::from_env()?;
    let backend = HttpBackend::new(&config.backend, &credentials)?;
    let listen_addr = config.listen_addr.clone();
    let autostart = config.session.autostart;
    let daemon = Arc::new(Daemon::new(
        config,
        credentials,
        Arc::new(backend),
        Some(paths.round_file()),
    ));

    // Stop the session cleanly on Ctrl-C so the push channel is closed.
    {
        let daemon = Arc::clone(&daemon);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                if daemon.flags().started() {
                    if let Err(e) = daemon.stop().await {
                        error!("Ctrl-C stop failed: {}", e);
                    } else {
                        info!("Ctrl-C: session stopped");
                    }
                }
                std::process::exit(0);
            }
        });
    }

    if autostart {
        if let Err(e) = daemon.start().await {
            warn!("Autostart failed: {}", e);
        }
    }

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("ccshuffled listening on {}", listen_addr);

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("Client connected: {}", addr);
        let daemon = Arc::clone(&daemon);

        tokio::spawn(async move {
            if let Err(e) = ipc::handle_client(stream, daemon).await {
                error!("Client handler error: {}", e);
            }
        });
    }
}
