//! # CLI Interface
//!
//! `lango-node` subcommands: `run`, `init`, `handshake`, `status`, `version`.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

use lango_p2p::config::DEFAULT_API_PORT;

use crate::logging::LogFormat;

/// Lango P2P agent node.
///
/// Announces this agent on the gossip network, answers handshakes, serves
/// tool calls through the firewall, and exposes a read-only status API
/// plus Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "lango-node",
    about = "Lango P2P agent node",
    version,
    propagate_version = true
)]
pub struct LangoNodeCli {
    /// Log output format.
    #[arg(long, global = true, env = "LANGO_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Create the data directory and a fresh wallet key.
    Init(InitArgs),
    /// Run one handshake against a remote node and print the session.
    Handshake(HandshakeArgs),
    /// Query a running node's status endpoint.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Node configuration file (TOML). Defaults to `config.toml` in the
    /// data directory when that file exists.
    #[arg(long, short = 'c', env = "LANGO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Data directory holding the wallet key and reputation database.
    #[arg(long, short = 'd', env = "LANGO_DATA_DIR", default_value = ".lango")]
    pub data_dir: PathBuf,

    /// libp2p port for gossip, handshakes and tool calls. Overrides the
    /// config file.
    #[arg(long, env = "LANGO_P2P_PORT")]
    pub p2p_port: Option<u16>,

    /// Status API and metrics port. Overrides the config file.
    #[arg(long, env = "LANGO_API_PORT")]
    pub api_port: Option<u16>,

    /// Extra bootstrap multiaddrs, appended to the config file's list.
    #[arg(long = "bootstrap", env = "LANGO_BOOTSTRAP", value_delimiter = ',')]
    pub bootstrap: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct InitArgs {
    #[arg(long, short = 'd', env = "LANGO_DATA_DIR", default_value = ".lango")]
    pub data_dir: PathBuf,

    /// Overwrite an existing wallet key.
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
pub struct HandshakeArgs {
    #[arg(long, short = 'd', env = "LANGO_DATA_DIR", default_value = ".lango")]
    pub data_dir: PathBuf,

    #[arg(long, short = 'c', env = "LANGO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Remote node, e.g. `/ip4/127.0.0.1/tcp/9740/p2p/12D3KooW...`.
    pub peer: String,

    /// Dial with the legacy 1.0.0 protocol.
    #[arg(long)]
    pub legacy: bool,
}

#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Status API of the running node.
    #[arg(long, default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_API_PORT)))]
    pub api: SocketAddr,

    /// Path to fetch.
    #[arg(long, default_value = "/status")]
    pub path: String,
}
