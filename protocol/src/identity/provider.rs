//! Local identity: the wallet plus a cached DID.

use std::sync::Arc;

use parking_lot::RwLock;

use super::did::{derive_did, Did, IdentityError};
use super::wallet::WalletProvider;

/// Derives the local agent's DID from its wallet and caches it.
///
/// The wallet might be a hardware device that takes a round-trip per
/// public-key request, so we ask once. The cache is filled under a write
/// lock and read under a read lock; the DID never changes for the life of
/// the process.
pub struct IdentityProvider {
    wallet: Arc<dyn WalletProvider>,
    cached: RwLock<Option<Did>>,
}

impl IdentityProvider {
    pub fn new(wallet: Arc<dyn WalletProvider>) -> Self {
        Self {
            wallet,
            cached: RwLock::new(None),
        }
    }

    /// The local DID, derived on first call.
    pub fn did(&self) -> Result<Did, IdentityError> {
        if let Some(did) = self.cached.read().as_ref() {
            return Ok(did.clone());
        }

        let mut slot = self.cached.write();
        // Another caller may have won the race while we waited.
        if let Some(did) = slot.as_ref() {
            return Ok(did.clone());
        }
        let did = derive_did(&self.wallet.public_key()?)?;
        tracing::debug!(did = %did, peer_id = %did.peer_id(), "derived local DID");
        *slot = Some(did.clone());
        Ok(did)
    }

    /// Sign with the local wallet.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, IdentityError> {
        self.wallet.sign(message)
    }

    pub fn wallet(&self) -> &Arc<dyn WalletProvider> {
        &self.wallet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Ed25519Wallet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingWallet {
        inner: Ed25519Wallet,
        key_requests: AtomicUsize,
    }

    impl WalletProvider for CountingWallet {
        fn public_key(&self) -> Result<Vec<u8>, IdentityError> {
            self.key_requests.fetch_add(1, Ordering::SeqCst);
            self.inner.public_key()
        }

        fn sign(&self, message: &[u8]) -> Result<Vec<u8>, IdentityError> {
            self.inner.sign(message)
        }
    }

    struct BrokenWallet;

    impl WalletProvider for BrokenWallet {
        fn public_key(&self) -> Result<Vec<u8>, IdentityError> {
            Err(IdentityError::Wallet("device unplugged".into()))
        }

        fn sign(&self, _message: &[u8]) -> Result<Vec<u8>, IdentityError> {
            Err(IdentityError::Wallet("device unplugged".into()))
        }
    }

    #[test]
    fn test_did_is_cached_after_first_derivation() {
        let wallet = Arc::new(CountingWallet {
            inner: Ed25519Wallet::from_seed(&[1u8; 32]),
            key_requests: AtomicUsize::new(0),
        });
        let provider = IdentityProvider::new(wallet.clone());

        let first = provider.did().unwrap();
        let second = provider.did().unwrap();
        assert_eq!(first, second);
        assert_eq!(wallet.key_requests.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wallet_failure_is_not_cached() {
        let provider = IdentityProvider::new(Arc::new(BrokenWallet));
        assert!(matches!(provider.did(), Err(IdentityError::Wallet(_))));
        assert!(provider.did().is_err());
    }

    #[test]
    fn test_concurrent_callers_see_same_did() {
        let provider = Arc::new(IdentityProvider::new(Arc::new(Ed25519Wallet::generate())));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let p = provider.clone();
                std::thread::spawn(move || p.did().unwrap())
            })
            .collect();
        let dids: Vec<Did> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(dids.windows(2).all(|w| w[0] == w[1]));
    }
}
