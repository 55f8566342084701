use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use filebridge::{BridgeConfig, config};

/// CLI overrides of the config file (spec §10.1): any flag given here wins
/// over whatever `--config` loaded.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// config file
    #[arg(short, long, default_value = "/etc/filebridge/config.toml")]
    config: String,

    /// override the HTTP front's listen port
    #[arg(long)]
    http_port: Option<u16>,

    /// override the provider-stream TCP front's listen port
    #[arg(long)]
    tcp_port: Option<u16>,

    /// override the maximum accepted declared size, in GiB
    #[arg(long)]
    max_file_size_gib: Option<u64>,

    /// override the minted token length in characters (6-32, else UUID)
    #[arg(long)]
    token_length: Option<usize>,

    /// override the base URL used to synthesize `download_url`
    #[arg(long)]
    public_base_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = match config::read_config(&PathBuf::from(&cli.config)).await {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(%err, config = %cli.config, "falling back to default config");
            BridgeConfig::default()
        }
    };

    apply_cli_overrides(&mut config, &cli);

    filebridge::run(config).await
}

/// Applies `Cli`'s flag overrides on top of the loaded config file (spec
/// §10.1: "CLI wins over file").
fn apply_cli_overrides(config: &mut BridgeConfig, cli: &Cli) {
    if let Some(port) = cli.http_port {
        config.http.socket = replace_port(&config.http.socket, port);
    }
    if let Some(port) = cli.tcp_port {
        config.tcp.socket = replace_port(&config.tcp.socket, port);
    }
    if let Some(gib) = cli.max_file_size_gib {
        config.max_file_size_gib = gib;
    }
    if let Some(len) = cli.token_length {
        config.token_length = len;
    }
    if let Some(url) = cli.public_base_url.clone() {
        config.http.public_base_url = Some(url);
    }
}

/// Rebuilds a `host:port` socket string with a new port, keeping the host.
fn replace_port(socket: &str, port: u16) -> String {
    let host = socket.rsplit_once(':').map_or(socket, |(host, _)| host);
    format!("{host}:{port}")
}
