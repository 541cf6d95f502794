//! # Gossip Discovery
//!
//! Agents find each other by shouting. Every node broadcasts a signed
//! [`GossipCard`] (who it is, what it can do, what it charges, and any
//! zero-knowledge credentials backing those claims) on a gossipsub topic
//! and listens for everyone else's.
//!
//! ```text
//!  publisher ──every interval──► transport.publish(topic, card)
//!
//!  transport ──► mpsc ──► subscriber ──► pipeline ──► PeerDirectory
//!                                          │
//!   self? json? DID? revoked? sender? peer id? signature? clock? credentials?
//! ```
//!
//! Card problems are never errors: bad cards are logged and dropped.
//! A card whose credential is merely expired or old keeps the rest of its
//! claims; a card carrying a credential that fails verification is
//! discarded outright.

pub mod card;
pub mod directory;
pub mod service;
pub mod verifier;

use thiserror::Error;

use crate::config::ConfigError;
use crate::identity::IdentityError;
use crate::zkp::ProverError;

pub use card::{GossipCard, ZkCredential};
pub use directory::{PeerDirectory, Upsert};
pub use service::{DropReason, GossipEnvelope, GossipService, GossipTransport, Ingest};
pub use verifier::{issue_capability_credential, CredentialVerifier, ProverCredentialVerifier};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The transport couldn't publish.
    #[error("gossip transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Prover(#[from] ProverError),

    #[error("card serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
