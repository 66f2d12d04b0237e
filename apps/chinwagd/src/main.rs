//! chinwagd: the chinwag chat relay daemon.
//!
//! Reads an optional JSON settings file, binds the listener and runs
//! the engine until a ctrl-c or a client-issued shutdown phrase.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::prelude::*;

use chinwag_server::{Engine, Settings, TcpTransport, TracingEventLog};

#[derive(Parser)]
#[command(name = "chinwagd")]
#[command(about = "Multi-client chat relay server", version)]
struct Cli {
    /// Path to a JSON settings file. Missing fields take defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the settings file.
    #[arg(long)]
    listen: Option<SocketAddr>,
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading settings file {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing settings file {}", path.display()))?
        }
        None => Settings::default(),
    };
    if let Some(listen) = cli.listen {
        settings.listen_addr = listen;
    }
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chinwagd=info,chinwag_server=info,warn"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let settings = load_settings(&cli)?;
    let listen_addr = settings.listen_addr;
    info!(version = env!("CARGO_PKG_VERSION"), %listen_addr, "starting chinwagd");

    let engine = Arc::new(Engine::new(settings, Arc::new(TracingEventLog))?);
    let transport = TcpTransport::bind(listen_addr)
        .await
        .with_context(|| format!("binding {listen_addr}"))?;

    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal");
            cancel.cancel();
        }
    });

    engine.run(transport).await?;
    info!("chinwagd stopped");
    Ok(())
}
