//! # Wallets
//!
//! The trust core never touches private keys directly. It talks to a
//! [`WalletProvider`], which can be anything that hands out a public key
//! and signs bytes: a hardware wallet, a remote signer, or one of the two
//! in-process implementations here.
//!
//! - [`Ed25519Wallet`] — an ed25519-dalek signing key. This is what the
//!   node uses by default, and its secret converts into the libp2p host
//!   keypair so the node's `PeerId` matches its DID.
//! - [`Libp2pWallet`] — any libp2p keypair, which is how secp256k1 wallets
//!   get in. Mostly handy in tests.

use std::fmt;

use ed25519_dalek::{Signer, SigningKey};
use libp2p::identity::Keypair;
use rand::rngs::OsRng;

use super::did::IdentityError;

/// Public-key + sign interface to whatever holds the agent's wallet key.
pub trait WalletProvider: Send + Sync {
    /// Raw public key bytes (33-byte compressed secp256k1 or 32-byte ed25519).
    fn public_key(&self) -> Result<Vec<u8>, IdentityError>;

    /// Sign `message`. The signature must verify under [`Self::public_key`]
    /// with libp2p's verifier for that key type.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, IdentityError>;
}

// ---------------------------------------------------------------------------
// Ed25519Wallet
// ---------------------------------------------------------------------------

/// In-process ed25519 wallet.
///
/// Not `Serialize`, on purpose. Persisting a secret key should be an
/// explicit call to [`Ed25519Wallet::secret_key_hex`].
pub struct Ed25519Wallet {
    signing_key: SigningKey,
}

impl Ed25519Wallet {
    /// Fresh key from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic key from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Load from the hex produced by [`Self::secret_key_hex`].
    pub fn from_hex(hex_str: &str) -> Result<Self, IdentityError> {
        let bytes = hex::decode(hex_str.trim())?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IdentityError::Wallet("secret key must be 32 bytes".into()))?;
        Ok(Self::from_seed(&seed))
    }

    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// The libp2p host keypair for this wallet. Same secret, so the host's
    /// `PeerId` equals the one derived from the wallet DID.
    pub fn to_libp2p_keypair(&self) -> Result<Keypair, IdentityError> {
        Keypair::ed25519_from_bytes(self.signing_key.to_bytes())
            .map_err(|e| IdentityError::Wallet(e.to_string()))
    }
}

impl WalletProvider for Ed25519Wallet {
    fn public_key(&self) -> Result<Vec<u8>, IdentityError> {
        Ok(self.public_key_bytes().to_vec())
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, IdentityError> {
        Ok(self.signing_key.sign(message).to_bytes().to_vec())
    }
}

impl fmt::Debug for Ed25519Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519Wallet")
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Libp2pWallet
// ---------------------------------------------------------------------------

/// Wallet backed by a libp2p keypair (ed25519 or secp256k1).
#[derive(Clone)]
pub struct Libp2pWallet {
    keypair: Keypair,
}

impl Libp2pWallet {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    pub fn generate_secp256k1() -> Self {
        Self::new(Keypair::generate_secp256k1())
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }
}

impl WalletProvider for Libp2pWallet {
    fn public_key(&self) -> Result<Vec<u8>, IdentityError> {
        let public = self.keypair.public();
        if let Ok(secp) = public.clone().try_into_secp256k1() {
            return Ok(secp.to_bytes().to_vec());
        }
        public
            .try_into_ed25519()
            .map(|ed| ed.to_bytes().to_vec())
            .map_err(|e| IdentityError::Wallet(e.to_string()))
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, IdentityError> {
        self.keypair
            .sign(message)
            .map_err(|e| IdentityError::Wallet(e.to_string()))
    }
}

impl fmt::Debug for Libp2pWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Libp2pWallet")
            .field("peer_id", &self.keypair.public().to_peer_id())
            .finish_non_exhaustive()
    }
}
