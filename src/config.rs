use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{Level, debug, instrument};

/// HTTP front configuration (spec §6.3: HTTP listen port, plus the
/// optional reverse-proxy base URL from spec §9's `download_url` re-architecture).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// ip:port the HTTP front binds to.
    pub socket: String,

    /// base URL to synthesize `download_url` from (e.g. `https://ffb.example`).
    /// When unset, the register handler falls back to request-derived
    /// scheme/host (`X-Forwarded-Proto`/`X-Forwarded-Scheme`, else TLS presence).
    pub public_base_url: Option<String>,
}

/// Provider-stream TCP front configuration (spec §6.3: TCP listen port).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TcpConfig {
    /// ip:port the stream acceptor binds to.
    pub socket: String,

    /// host advertised in the `tcp_endpoint` of a register response. Usually
    /// the public hostname of this bridge, since the Provider connects to it
    /// directly rather than through the HTTP reverse proxy.
    pub public_host: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub http: HttpConfig,
    pub tcp: TcpConfig,

    /// maximum accepted `declared_size` on register, in GiB (spec §6.3).
    pub max_file_size_gib: u64,

    /// token length in characters; only 6..=32 is honored, otherwise the
    /// minter falls back to a UUID (spec §4.1).
    pub token_length: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            http: HttpConfig {
                socket: "0.0.0.0:8080".to_owned(),
                public_base_url: None,
            },
            tcp: TcpConfig {
                socket: "0.0.0.0:8081".to_owned(),
                public_host: "127.0.0.1".to_owned(),
            },
            max_file_size_gib: 100,
            token_length: 16,
        }
    }
}

impl BridgeConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_gib.saturating_mul(1024 * 1024 * 1024)
    }
}

// in order to extract the config table from a larger document, we need to
// specify it as a subtable of the root node, i.e. a substruct
#[derive(Debug, Serialize, Deserialize)]
struct TomlConfigFile {
    config: BridgeConfig,
}

#[instrument(level = Level::DEBUG)]
pub async fn read_config(path: &Path) -> anyhow::Result<BridgeConfig> {
    debug!("reading config file");

    let doc = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read config file {path:?}"))?;

    let data: TomlConfigFile =
        toml::from_str(&doc).with_context(|| format!("failed to parse config file {path:?}"))?;

    debug!("successfully parsed config file");
    Ok(data.config)
}
