use anyhow::Context;
use clap::Parser;
use tracing::info;

use waymark_relay::{cli::Cli, config::Config, registry::Registry, serve};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to WARN if RUST_LOG is not set.
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(host) = cli.host {
        config.host = host;
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("waymark relay listening on {addr}");

    serve(listener, Registry::new())
        .await
        .context("relay server exited")?;
    Ok(())
}
