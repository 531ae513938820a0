//! Command-line configuration: where to find the chain spec, where to keep
//! local state, which validator key to sign with, and how chatty to be.

use {
  crate::consensus::Genesis,
  clap::Parser,
  std::{net::SocketAddr, path::PathBuf},
};

#[derive(Debug, Parser)]
#[clap(name = "meridian-node", version, about = "Block-DAG consensus validator node")]
pub struct CliOpts {
  /// Path to the genesis/chain-spec TOML file.
  #[clap(long, env = "MERIDIAN_GENESIS", default_value = "genesis.toml")]
  pub genesis_path: PathBuf,

  /// Directory holding this node's persistent DAG store.
  #[clap(long, env = "MERIDIAN_DATA_DIR", default_value = "data")]
  pub data_dir: PathBuf,

  /// Base58-encoded secret key for this node's validator identity. When
  /// absent the node runs in listen-only mode and never produces.
  #[clap(long, env = "MERIDIAN_VALIDATOR_KEY")]
  pub validator_key: Option<String>,

  /// Addresses to gossip-listen on.
  #[clap(long = "listen", default_value = "127.0.0.1:7070")]
  pub listen_addrs: Vec<SocketAddr>,

  /// Addresses of bootstrap peers to dial on startup.
  #[clap(long = "peer")]
  pub peers: Vec<SocketAddr>,

  /// -v for debug, -vv for trace; omitted defaults to info.
  #[clap(short, long, parse(from_occurrences))]
  pub verbose: u8,
}

impl CliOpts {
  pub fn genesis(&self) -> anyhow::Result<Genesis> {
    let raw = std::fs::read_to_string(&self.genesis_path)?;
    Ok(toml::from_str(&raw)?)
  }

  pub fn validator_keypair(&self) -> anyhow::Result<Option<crate::primitives::Keypair>> {
    self
      .validator_key
      .as_ref()
      .map(|s| s.parse().map_err(anyhow::Error::from))
      .transpose()
  }

  pub fn log_level(&self) -> tracing::Level {
    match self.verbose {
      0 => tracing::Level::INFO,
      1 => tracing::Level::DEBUG,
      _ => tracing::Level::TRACE,
    }
  }
}
