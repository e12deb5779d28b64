use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

mod config;
mod routes;

use config::GatewayConfig;
use routes::AppState;

#[derive(Parser)]
#[command(name = "dispenser-gateway")]
#[command(about = "HTTP gateway relaying commands and telemetry for pill dispensers")]
struct Args {
    /// YAML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(long, env = "DISPENSER_LISTEN_ADDR")]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => GatewayConfig::load(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    let addr = config.socket_addr()?;

    let state = AppState::new().map_err(|e| anyhow!(e))?;
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "dispenser gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("serving http")?;

    info!("dispenser gateway shutting down");
    Ok(())
}

fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
