//! # Node Configuration
//!
//! The node's TOML file is the library's [`P2pConfig`] (flattened, so
//! `[handshake]`, `[firewall]` and friends sit at the top level) plus a
//! `[node]` table, ACL rules and prices:
//!
//! ```toml
//! [node]
//! name = "summarizer"
//! capabilities = ["summarize"]
//! bootstrap = ["/ip4/10.0.0.7/tcp/9740"]
//!
//! [firewall.owner]
//! email = "me@example.com"
//!
//! [[acl]]
//! peer_did = "*"
//! action = "allow"
//! tools = ["ping"]
//!
//! [pricing]
//! currency = "USDC"
//! tools = { summarize = 250 }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use lango_p2p::config::{P2pConfig, DEFAULT_API_PORT, DEFAULT_P2P_PORT};
use lango_p2p::firewall::AclRule;

use crate::cli::RunArgs;

pub const CONFIG_FILE: &str = "config.toml";
pub const WALLET_KEY_FILE: &str = "wallet.key";
pub const REPUTATION_DIR: &str = "reputation";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    /// Name on the gossip card.
    pub name: String,
    pub listen_host: String,
    /// Gossip, handshakes and tool calls.
    pub p2p_port: u16,
    pub api_port: u16,
    pub bootstrap: Vec<String>,
    /// Capabilities advertised on the gossip card.
    pub capabilities: Vec<String>,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            name: "lango-agent".into(),
            listen_host: "0.0.0.0".into(),
            p2p_port: DEFAULT_P2P_PORT,
            api_port: DEFAULT_API_PORT,
            bootstrap: Vec::new(),
            capabilities: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingSettings {
    pub currency: String,
    /// Price of any tool not listed, in the currency's smallest unit.
    pub default_price: u64,
    pub tools: BTreeMap<String, u64>,
}

impl Default for PricingSettings {
    fn default() -> Self {
        Self {
            currency: "USDC".into(),
            default_price: 0,
            tools: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node: NodeSettings,
    pub acl: Vec<AclRule>,
    pub pricing: PricingSettings,
    #[serde(flatten)]
    pub p2p: P2pConfig,
}

impl NodeConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid node configuration")
    }

    /// Load `path`, or `<data_dir>/config.toml` if it exists, or defaults.
    pub fn load(path: Option<&Path>, data_dir: &Path) -> Result<Self> {
        let candidate = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Some(data_dir.join(CONFIG_FILE)).filter(|p| p.exists()),
        };
        let mut config = match candidate {
            Some(p) => {
                let text = std::fs::read_to_string(&p)
                    .with_context(|| format!("failed to read config {}", p.display()))?;
                Self::from_toml(&text).with_context(|| format!("in {}", p.display()))?
            }
            None => Self::default(),
        };
        if config.p2p.data_dir.is_none() {
            config.p2p.data_dir = Some(data_dir.to_path_buf());
        }
        config.p2p.validate()?;
        Ok(config)
    }

    /// Command-line flags win over the file.
    pub fn apply_args(&mut self, args: &RunArgs) {
        if let Some(port) = args.p2p_port {
            self.node.p2p_port = port;
        }
        if let Some(port) = args.api_port {
            self.node.api_port = port;
        }
        self.node.bootstrap.extend(args.bootstrap.iter().cloned());
    }

    pub fn data_dir(&self) -> PathBuf {
        self.p2p.data_dir.clone().unwrap_or_else(|| PathBuf::from(".lango"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lango_p2p::firewall::AclAction;
    use lango_p2p::zkp::ProofScheme;

    #[test]
    fn documented_example_parses() {
        let config = NodeConfig::from_toml(
            r#"
            [node]
            name = "summarizer"
            capabilities = ["summarize"]

            [handshake]
            timeout_secs = 10
            zk_enabled = true

            [prover]
            scheme = "plonk"

            [firewall.owner]
            email = "me@example.com"

            [[acl]]
            peer_did = "*"
            action = "allow"
            tools = ["ping"]
            rate_limit = 30

            [pricing]
            currency = "USDC"
            tools = { summarize = 250 }
            "#,
        )
        .unwrap();

        assert_eq!(config.node.name, "summarizer");
        assert_eq!(config.node.p2p_port, DEFAULT_P2P_PORT);
        assert_eq!(config.p2p.handshake.timeout_secs, 10);
        assert!(config.p2p.handshake.zk_enabled);
        assert_eq!(config.p2p.prover.scheme, ProofScheme::Plonk);
        assert_eq!(config.p2p.firewall.owner.email.as_deref(), Some("me@example.com"));
        assert_eq!(config.acl.len(), 1);
        assert_eq!(config.acl[0].action, AclAction::Allow);
        assert_eq!(config.acl[0].rate_limit, 30);
        assert_eq!(config.pricing.tools["summarize"], 250);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig::load(None, dir.path()).unwrap();
        assert_eq!(config.node.api_port, DEFAULT_API_PORT);
        assert_eq!(config.data_dir(), dir.path());
    }

    #[test]
    fn zero_publish_interval_is_refused_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[discovery]\npublish_interval_secs = 0\n").unwrap();
        let err = NodeConfig::load(Some(&path), dir.path()).unwrap_err();
        assert!(err.to_string().contains("publish_interval_secs"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(NodeConfig::load(Some(&dir.path().join("nope.toml")), dir.path()).is_err());
    }
}
