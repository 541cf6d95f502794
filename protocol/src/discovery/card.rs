//! Agent cards and the credentials they carry.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::firewall::PriceQuote;
use crate::identity::{Did, IdentityError, IdentityProvider};
use crate::zkp::Proof;

/// A zero-knowledge proof that the agent holds some capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZkCredential {
    pub capability_id: String,
    pub proof: Proof,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ZkCredential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Issued longer than `max_age` ago.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.issued_at + max_age < now
    }
}

/// What an agent tells the network about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GossipCard {
    pub name: String,
    pub did: String,
    #[serde(default)]
    pub multiaddrs: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<Vec<PriceQuote>>,
    #[serde(default)]
    pub zk_credentials: Vec<ZkCredential>,
    pub peer_id: String,
    pub timestamp: DateTime<Utc>,
    /// Wallet signature over [`GossipCard::signing_bytes`].
    #[serde(default, with = "crate::encoding::hex_bytes_opt")]
    pub signature: Option<Vec<u8>>,
}

impl GossipCard {
    /// An unsigned card for `did` stamped with the current time.
    pub fn new(name: impl Into<String>, did: &Did) -> Self {
        Self {
            name: name.into(),
            did: did.id().to_string(),
            multiaddrs: Vec::new(),
            capabilities: Vec::new(),
            pricing: None,
            zk_credentials: Vec::new(),
            peer_id: did.peer_id().to_string(),
            timestamp: Utc::now(),
            signature: None,
        }
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// The card as JSON with the signature left out. Field order follows
    /// the struct, so every node produces the same bytes.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let unsigned = GossipCard {
            signature: None,
            ..self.clone()
        };
        serde_json::to_vec(&unsigned)
    }

    pub fn sign(&mut self, identity: &IdentityProvider) -> Result<(), IdentityError> {
        let bytes = self
            .signing_bytes()
            .map_err(|e| IdentityError::Wallet(e.to_string()))?;
        self.signature = Some(identity.sign(&bytes)?);
        Ok(())
    }

    /// `None` when unsigned, otherwise whether the signature checks out
    /// against the card's own DID.
    pub fn verify_signature(&self, did: &Did) -> Option<bool> {
        let signature = self.signature.as_ref()?;
        Some(match self.signing_bytes() {
            Ok(bytes) => did.verify(&bytes, signature),
            Err(_) => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Ed25519Wallet, WalletProvider};
    use std::sync::Arc;

    fn identity(seed: u8) -> IdentityProvider {
        let wallet: Arc<dyn WalletProvider> = Arc::new(Ed25519Wallet::from_seed(&[seed; 32]));
        IdentityProvider::new(wallet)
    }

    #[test]
    fn test_signed_card_verifies() {
        let id = identity(4);
        let did = id.did().unwrap();
        let mut card = GossipCard::new("weather-bot", &did);
        card.capabilities = vec!["weather".into()];
        assert_eq!(card.verify_signature(&did), None);

        card.sign(&id).unwrap();
        assert_eq!(card.verify_signature(&did), Some(true));

        card.capabilities.push("shell".into());
        assert_eq!(card.verify_signature(&did), Some(false));
    }

    #[test]
    fn test_card_json_round_trip() {
        let id = identity(5);
        let mut card = GossipCard::new("bot", &id.did().unwrap());
        card.sign(&id).unwrap();
        let json = serde_json::to_string(&card).unwrap();
        let back: GossipCard = serde_json::from_str(&json).unwrap();
        assert_eq!(back, card);
        assert!(!json.contains("pricing"));
    }
}
