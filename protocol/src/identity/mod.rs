//! # Identity Module
//!
//! Every agent on the network is identified by its wallet key. From that
//! single key we derive:
//!
//! 1. **DID** — `did:lango:<hex(pubkey)>`, what agents put on gossip
//!    cards, ACL rules and sessions.
//! 2. **PeerId** — the libp2p identity the same key produces. The node's
//!    host keypair *is* the wallet key, so a DID and the connection it
//!    arrives on can be cross-checked with [`verify_did`].
//!
//! Signing goes through the [`WalletProvider`] trait so the trust core
//! never owns key material it doesn't have to.

pub mod did;
pub mod provider;
pub mod wallet;

pub use did::{derive_did, did_from_string, verify_did, verify_signature, Did, IdentityError};
pub use provider::IdentityProvider;
pub use wallet::{Ed25519Wallet, Libp2pWallet, WalletProvider};
