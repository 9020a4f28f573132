//! Webhook server releasing quarantined registry images.

use std::net::SocketAddr;

use camino::Utf8PathBuf;
use clap::Parser;
use eyre::WrapErr as _;
use quarantine_gate::{GateConfig, webhook};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Utf8PathBuf,

    /// Address to listen on, overriding the configuration
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!("Unable to listen for shutdown signal: {error}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let mut config = GateConfig::load(&args.config)?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    let pool = config.pool()?;
    tracing::info!(
        registries = config.registries.len(),
        max_concurrent = config.scan.max_concurrent,
        "Loaded configuration from {}",
        args.config
    );

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .wrap_err_with(|| format!("binding {}", config.listen))?;
    tracing::info!("Quarantine gate listening on http://{}", config.listen);

    axum::serve(listener, webhook::router(pool))
        .with_graceful_shutdown(shutdown())
        .await?;

    Ok(())
}
