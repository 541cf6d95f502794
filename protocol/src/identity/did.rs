//! # `did:lango` Identifiers
//!
//! A Lango DID is nothing more than the wallet's public key, hex-encoded,
//! behind a fixed method prefix:
//!
//! ```text
//! did:lango:02a1b2c3...   (33-byte compressed secp256k1 key)
//! did:lango:9f8e7d6c...   (32-byte ed25519 key)
//! ```
//!
//! Because the key is in the identifier, anyone can verify a signature
//! from a DID without a registry lookup, and anyone can recompute the
//! libp2p `PeerId` the DID's owner must be dialing from. That second
//! property is what [`verify_did`] checks: a peer claiming a DID while
//! connected under a different `PeerId` is lying about one of the two.
//!
//! The key type is inferred from length. Anything other than 32 or 33
//! bytes is rejected before it reaches libp2p's decoders.

use std::fmt;

use libp2p::identity::{self, PublicKey};
use libp2p::PeerId;
use thiserror::Error;

use crate::config::DID_PREFIX;

/// Compressed secp256k1 public key length.
pub const SECP256K1_KEY_LENGTH: usize = 33;

/// Ed25519 public key length.
pub const ED25519_KEY_LENGTH: usize = 32;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Everything that can go wrong turning keys into DIDs and back.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Key bytes are empty, the wrong length, or not a point on the curve.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// The string does not start with `did:lango:`.
    #[error("invalid DID scheme: {0}")]
    InvalidDidScheme(String),

    /// `did:lango:` with nothing after it.
    #[error("DID has an empty key")]
    EmptyKey,

    /// The key part is not valid hex.
    #[error("invalid DID encoding: {0}")]
    InvalidEncoding(#[from] hex::FromHexError),

    /// The DID's key derives a different peer ID than the one claimed.
    #[error("peer ID mismatch: DID derives {expected}, peer claims {actual}")]
    PeerIdMismatch { expected: PeerId, actual: PeerId },

    /// The wallet refused or failed to produce a key or signature.
    #[error("wallet error: {0}")]
    Wallet(String),
}

// ---------------------------------------------------------------------------
// Did
// ---------------------------------------------------------------------------

/// A decentralized identifier bound to a wallet key and a libp2p peer ID.
///
/// Immutable once derived; all three fields are functions of `public_key`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Did {
    id: String,
    public_key: Vec<u8>,
    peer_id: PeerId,
}

impl Did {
    /// The full `did:lango:<hex>` string.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Raw public key bytes (33 for secp256k1, 32 for ed25519).
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// libp2p peer ID derived from the same key.
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Check a signature over `message` against this DID's key.
    ///
    /// Never panics on malformed signatures; they simply don't verify.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match decode_public_key(&self.public_key) {
            Ok(key) => key.verify(message, signature),
            Err(_) => false,
        }
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl fmt::Debug for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Did")
            .field("id", &self.id)
            .field("peer_id", &self.peer_id)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Derivation & parsing
// ---------------------------------------------------------------------------

/// Decode raw wallet key bytes into a libp2p public key.
fn decode_public_key(bytes: &[u8]) -> Result<PublicKey, IdentityError> {
    match bytes.len() {
        0 => Err(IdentityError::InvalidPublicKey("empty key".into())),
        SECP256K1_KEY_LENGTH => identity::secp256k1::PublicKey::try_from_bytes(bytes)
            .map(PublicKey::from)
            .map_err(|e| IdentityError::InvalidPublicKey(e.to_string())),
        ED25519_KEY_LENGTH => identity::ed25519::PublicKey::try_from_bytes(bytes)
            .map(PublicKey::from)
            .map_err(|e| IdentityError::InvalidPublicKey(e.to_string())),
        n => Err(IdentityError::InvalidPublicKey(format!(
            "unsupported key length {n}"
        ))),
    }
}

/// Derive the DID for a wallet public key.
///
/// ```
/// use lango_p2p::identity::{derive_did, Ed25519Wallet, WalletProvider};
///
/// let wallet = Ed25519Wallet::from_seed(&[7u8; 32]);
/// let did = derive_did(&wallet.public_key().unwrap()).unwrap();
/// assert!(did.id().starts_with("did:lango:"));
/// ```
pub fn derive_did(public_key: &[u8]) -> Result<Did, IdentityError> {
    let key = decode_public_key(public_key)?;
    Ok(Did {
        id: format!("{}{}", DID_PREFIX, hex::encode(public_key)),
        public_key: public_key.to_vec(),
        peer_id: key.to_peer_id(),
    })
}

/// Parse a `did:lango:<hex>` string.
///
/// The prefix must match exactly; `DID:lango:` or `did:lango2:` are
/// different methods as far as we're concerned. The key must be lowercase
/// hex so that every key has exactly one DID string; directory entries
/// and revocations are keyed on it.
pub fn did_from_string(s: &str) -> Result<Did, IdentityError> {
    let encoded = s
        .strip_prefix(DID_PREFIX)
        .ok_or_else(|| IdentityError::InvalidDidScheme(s.to_string()))?;
    if encoded.is_empty() {
        return Err(IdentityError::EmptyKey);
    }
    if let Some((index, c)) = encoded
        .char_indices()
        .find(|(_, c)| !matches!(c, '0'..='9' | 'a'..='f'))
    {
        return Err(hex::FromHexError::InvalidHexCharacter { c, index }.into());
    }
    let public_key = hex::decode(encoded)?;
    derive_did(&public_key)
}

/// Confirm that `claimed` is the peer ID `did`'s key derives.
pub fn verify_did(did: &Did, claimed: &PeerId) -> Result<(), IdentityError> {
    let expected = decode_public_key(&did.public_key)?.to_peer_id();
    if expected != *claimed {
        return Err(IdentityError::PeerIdMismatch {
            expected,
            actual: *claimed,
        });
    }
    Ok(())
}

/// Verify `signature` over `message` for a DID given as a string.
///
/// Returns `false` for unparseable DIDs rather than an error: callers
/// on the hot path only care whether the signature is good.
pub fn verify_signature(did: &str, message: &[u8], signature: &[u8]) -> bool {
    match did_from_string(did) {
        Ok(did) => did.verify(message, signature),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libp2p::identity::Keypair;

    fn secp_key() -> (Keypair, Vec<u8>) {
        let kp = Keypair::generate_secp256k1();
        let bytes = kp
            .public()
            .try_into_secp256k1()
            .unwrap()
            .to_bytes()
            .to_vec();
        (kp, bytes)
    }

    #[test]
    fn test_secp256k1_did_round_trip() {
        let (kp, bytes) = secp_key();
        assert_eq!(bytes.len(), SECP256K1_KEY_LENGTH);

        let did = derive_did(&bytes).unwrap();
        assert!(did.id().starts_with(DID_PREFIX));
        assert_eq!(did.peer_id(), kp.public().to_peer_id());

        let parsed = did_from_string(did.id()).unwrap();
        assert_eq!(parsed, did);
        assert_eq!(parsed.public_key(), bytes.as_slice());
    }

    #[test]
    fn test_ed25519_did_matches_libp2p_peer_id() {
        let kp = Keypair::generate_ed25519();
        let bytes = kp.public().try_into_ed25519().unwrap().to_bytes();
        let did = derive_did(&bytes).unwrap();
        assert_eq!(did.peer_id(), kp.public().to_peer_id());
    }

    #[test]
    fn test_did_is_lowercase_hex() {
        let (_, bytes) = secp_key();
        let did = derive_did(&bytes).unwrap();
        let suffix = did.id().strip_prefix(DID_PREFIX).unwrap();
        assert_eq!(suffix, suffix.to_lowercase());
        assert_eq!(suffix.len(), SECP256K1_KEY_LENGTH * 2);
    }

    #[test]
    fn test_empty_and_malformed_keys_are_rejected() {
        assert!(matches!(
            derive_did(&[]),
            Err(IdentityError::InvalidPublicKey(_))
        ));
        assert!(matches!(
            derive_did(&[1, 2, 3]),
            Err(IdentityError::InvalidPublicKey(_))
        ));
        // Right length, not a curve point (0x05 is not a valid SEC1 tag).
        assert!(matches!(
            derive_did(&[5u8; 33]),
            Err(IdentityError::InvalidPublicKey(_))
        ));
    }

    #[test]
    fn test_did_from_string_errors() {
        assert!(matches!(
            did_from_string("did:key:abcd"),
            Err(IdentityError::InvalidDidScheme(_))
        ));
        assert!(matches!(
            did_from_string("DID:lango:abcd"),
            Err(IdentityError::InvalidDidScheme(_))
        ));
        assert!(matches!(
            did_from_string("did:lango:"),
            Err(IdentityError::EmptyKey)
        ));
        assert!(matches!(
            did_from_string("did:lango:zz"),
            Err(IdentityError::InvalidEncoding(_))
        ));
        // Valid hex, not a valid key.
        assert!(matches!(
            did_from_string("did:lango:0102"),
            Err(IdentityError::InvalidPublicKey(_))
        ));
    }

    #[test]
    fn test_uppercase_did_is_not_an_alias() {
        let (_, bytes) = secp_key();
        let did = derive_did(&bytes).unwrap();
        let suffix = did.id().strip_prefix(DID_PREFIX).unwrap();

        let shouting = format!("{}{}", DID_PREFIX, suffix.to_uppercase());
        assert!(matches!(
            did_from_string(&shouting),
            Err(IdentityError::InvalidEncoding(_))
        ));
        let letter = suffix.find(|c: char| c.is_ascii_alphabetic()).unwrap();
        let mut mixed = suffix.to_string();
        mixed[letter..=letter].make_ascii_uppercase();
        assert!(did_from_string(&format!("{}{}", DID_PREFIX, mixed)).is_err());
        assert!(!verify_signature(&shouting, b"x", &[0u8; 64]));

        assert_eq!(did_from_string(did.id()).unwrap().id(), did.id());
    }

    #[test]
    fn test_verify_did_detects_peer_mismatch() {
        let (kp, bytes) = secp_key();
        let did = derive_did(&bytes).unwrap();
        verify_did(&did, &kp.public().to_peer_id()).unwrap();

        let stranger = Keypair::generate_ed25519().public().to_peer_id();
        assert!(matches!(
            verify_did(&did, &stranger),
            Err(IdentityError::PeerIdMismatch { .. })
        ));
    }

    #[test]
    fn test_signature_verification_through_did() {
        let (kp, bytes) = secp_key();
        let did = derive_did(&bytes).unwrap();
        let sig = kp.sign(b"hello agents").unwrap();

        assert!(did.verify(b"hello agents", &sig));
        assert!(!did.verify(b"hello agentz", &sig));
        assert!(!did.verify(b"hello agents", &[0u8; 12]));
        assert!(verify_signature(did.id(), b"hello agents", &sig));
        assert!(!verify_signature("did:lango:", b"hello agents", &sig));
    }
}
