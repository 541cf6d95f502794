//! # Protocol Configuration & Constants
//!
//! Every magic number in the trust core lives here, next to the
//! serde-friendly config structs the node loads from TOML. If you're
//! hardcoding a timeout somewhere else, you're doing it wrong.
//!
//! The config structs are intentionally flat and all fields have defaults,
//! so a config file only needs to mention what it changes:
//!
//! ```toml
//! [handshake]
//! timeout_secs = 10
//!
//! [firewall.owner]
//! name = "Ada Lovelace"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::zkp::{ProofScheme, SrsMode};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// DID method prefix. Everything after it is the lowercase hex of the
/// wallet's public key.
pub const DID_PREFIX: &str = "did:lango:";

/// Legacy handshake protocol. Signed challenges are optional.
pub const HANDSHAKE_PROTOCOL_V1_0: &str = "/lango/handshake/1.0.0";

/// Current handshake protocol. The responder must sign its challenge.
pub const HANDSHAKE_PROTOCOL_V1_1: &str = "/lango/handshake/1.1.0";

/// Capability (agent-to-agent) stream protocol.
pub const A2A_PROTOCOL: &str = "/lango/a2a/1.0.0";

/// Gossipsub topic carrying agent cards.
pub const GOSSIP_TOPIC: &str = "lango/agent-cards/1.0.0";

/// Agent version string advertised through libp2p identify.
pub const AGENT_VERSION: &str = concat!("lango-p2p/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Handshake & Sessions
// ---------------------------------------------------------------------------

/// Upper bound on a whole handshake, hello to ack.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default session lifetime once a handshake succeeds.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);

/// Nonce length in bytes. 256 bits, collisions are not a concern.
pub const NONCE_LENGTH: usize = 32;

/// Most half-finished handshakes (hello seen, response not yet) a
/// responder keeps at once. Past this, new hellos are refused.
pub const PENDING_HANDSHAKE_LIMIT: usize = 1024;

/// How often the nonce cache sweeps expired entries.
pub const NONCE_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Consecutive authentication failures before a peer's session is killed.
pub const DEFAULT_MAX_AUTH_FAILURES: u32 = 5;

// ---------------------------------------------------------------------------
// Firewall & Reputation
// ---------------------------------------------------------------------------

/// Trust score below which the firewall refuses a known peer.
pub const DEFAULT_MIN_TRUST_SCORE: f64 = 0.3;

/// Attestation freshness window on either side of "now".
pub const DEFAULT_ATTESTATION_WINDOW: Duration = Duration::from_secs(5 * 60);

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// How often the local agent card is re-published.
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(30);

/// Credentials issued longer ago than this are ignored even if unexpired.
pub const DEFAULT_MAX_CREDENTIAL_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// How far in the future a card's timestamp may be before it is dropped.
/// A card stamped further ahead would outrank every honest update.
pub const DEFAULT_MAX_CARD_CLOCK_SKEW: Duration = Duration::from_secs(5 * 60);

// ---------------------------------------------------------------------------
// Node defaults
// ---------------------------------------------------------------------------

/// Default libp2p TCP port. Gossip, handshakes and tool calls all share it.
pub const DEFAULT_P2P_PORT: u16 = 9740;

/// Default status API port.
pub const DEFAULT_API_PORT: u16 = 9742;

// ---------------------------------------------------------------------------
// Component configs
// ---------------------------------------------------------------------------

/// Handshake and session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    pub timeout_secs: u64,
    pub session_ttl_secs: u64,
    /// Initiators dial the 1.1 protocol and demand a signed challenge.
    pub require_signed_challenge: bool,
    /// Responders ask initiators for a wallet-ownership proof instead of a
    /// plain signature.
    pub zk_enabled: bool,
    /// Ask the local approver before admitting a new peer.
    pub require_approval: bool,
    /// Skip approval for peers that already hold a live session.
    pub auto_approve_known_peers: bool,
    pub max_auth_failures: u32,
}

impl HandshakeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Replay window for nonces: twice the handshake timeout, so a nonce
    /// outlives every handshake that could legitimately carry it.
    pub fn nonce_ttl(&self) -> Duration {
        self.timeout() * 2
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT.as_secs(),
            session_ttl_secs: DEFAULT_SESSION_TTL.as_secs(),
            require_signed_challenge: true,
            zk_enabled: false,
            require_approval: false,
            auto_approve_known_peers: true,
            max_auth_failures: DEFAULT_MAX_AUTH_FAILURES,
        }
    }
}

/// Owner data that must never leave the node in a payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnerProtectionConfig {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub extra_terms: Vec<String>,
}

/// Firewall settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallConfig {
    pub min_trust_score: f64,
    pub owner: OwnerProtectionConfig,
    pub attestation_enabled: bool,
    pub attestation_window_secs: u64,
}

impl FirewallConfig {
    pub fn attestation_window(&self) -> Duration {
        Duration::from_secs(self.attestation_window_secs)
    }
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            min_trust_score: DEFAULT_MIN_TRUST_SCORE,
            owner: OwnerProtectionConfig::default(),
            attestation_enabled: false,
            attestation_window_secs: DEFAULT_ATTESTATION_WINDOW.as_secs(),
        }
    }
}

/// Gossip discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub topic: String,
    pub publish_interval_secs: u64,
    pub max_credential_age_secs: u64,
    /// Drop cards that don't carry a wallet signature.
    pub require_signed_cards: bool,
    pub max_clock_skew_secs: u64,
}

impl DiscoveryConfig {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval_secs)
    }

    pub fn max_credential_age(&self) -> Duration {
        Duration::from_secs(self.max_credential_age_secs)
    }

    pub fn max_clock_skew(&self) -> Duration {
        Duration::from_secs(self.max_clock_skew_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.is_empty() {
            return Err(ConfigError::Invalid("discovery.topic must not be empty"));
        }
        // A zero interval turns the publisher into a busy loop.
        if self.publish_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "discovery.publish_interval_secs must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            topic: GOSSIP_TOPIC.to_string(),
            publish_interval_secs: DEFAULT_PUBLISH_INTERVAL.as_secs(),
            max_credential_age_secs: DEFAULT_MAX_CREDENTIAL_AGE.as_secs(),
            require_signed_cards: true,
            max_clock_skew_secs: DEFAULT_MAX_CARD_CLOCK_SKEW.as_secs(),
        }
    }
}

/// Prover backend and setup source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProverConfig {
    pub scheme: ProofScheme,
    pub srs: SrsMode,
}

/// Everything the trust core needs, in one place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct P2pConfig {
    pub handshake: HandshakeConfig,
    pub firewall: FirewallConfig,
    pub discovery: DiscoveryConfig,
    pub prover: ProverConfig,
    /// Directory for persistent state (reputation). `None` keeps
    /// everything in memory.
    pub data_dir: Option<PathBuf>,
}

impl P2pConfig {
    /// Reject values that parse but can't work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.handshake.timeout_secs == 0 {
            return Err(ConfigError::Invalid("handshake.timeout_secs must be at least 1"));
        }
        if self.handshake.session_ttl_secs == 0 {
            return Err(ConfigError::Invalid("handshake.session_ttl_secs must be at least 1"));
        }
        self.discovery.validate()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}
