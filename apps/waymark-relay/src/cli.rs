use clap::Parser;

/// Waymark relay: fans live position updates out to every map viewer
/// sharing a group token.
#[derive(Debug, Parser)]
#[command(name = "waymark-relay", version)]
pub struct Cli {
    /// Port to listen on (overrides WAYMARK_RELAY_PORT).
    #[arg(long)]
    pub port: Option<u16>,

    /// Address to bind (overrides WAYMARK_RELAY_HOST).
    #[arg(long)]
    pub host: Option<String>,
}
