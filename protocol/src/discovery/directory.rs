//! Known peers, keyed by DID, plus the revocation list.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use super::card::GossipCard;

/// Outcome of offering a card to the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
    /// Same or older timestamp than what we already hold.
    Stale,
    Revoked,
}

/// Cards and revocations live behind separate locks. Lock order, when
/// both are held: cards, then revoked.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    cards: RwLock<HashMap<String, GossipCard>>,
    revoked: RwLock<HashSet<String>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last-write-wins on `timestamp`: only a strictly newer card replaces
    /// the one we hold.
    pub fn upsert(&self, card: GossipCard) -> Upsert {
        let mut cards = self.cards.write();
        // Checked under the card lock so a concurrent revoke can't be
        // undone by a card that was already in flight.
        if self.is_revoked(&card.did) {
            return Upsert::Revoked;
        }
        match cards.get(&card.did) {
            Some(existing) if existing.timestamp >= card.timestamp => Upsert::Stale,
            Some(_) => {
                cards.insert(card.did.clone(), card);
                Upsert::Updated
            }
            None => {
                cards.insert(card.did.clone(), card);
                Upsert::Inserted
            }
        }
    }

    pub fn get(&self, did: &str) -> Option<GossipCard> {
        self.cards.read().get(did).cloned()
    }

    /// Every card, ordered by DID.
    pub fn all(&self) -> Vec<GossipCard> {
        let mut cards: Vec<GossipCard> = self.cards.read().values().cloned().collect();
        cards.sort_by(|a, b| a.did.cmp(&b.did));
        cards
    }

    pub fn find_by_capability(&self, capability: &str) -> Vec<GossipCard> {
        let mut cards: Vec<GossipCard> = self
            .cards
            .read()
            .values()
            .filter(|c| c.has_capability(capability))
            .cloned()
            .collect();
        cards.sort_by(|a, b| a.did.cmp(&b.did));
        cards
    }

    pub fn remove(&self, did: &str) -> Option<GossipCard> {
        self.cards.write().remove(did)
    }

    /// Refuse future cards from `did` and forget the current one.
    ///
    /// Revocations are stored in canonical (lowercase) form, so revoking
    /// `did:lango:AB..` blocks the only DID string that key can have.
    pub fn revoke_did(&self, did: &str) {
        let did = did.to_ascii_lowercase();
        self.revoked.write().insert(did.clone());
        self.cards.write().remove(&did);
    }

    pub fn is_revoked(&self, did: &str) -> bool {
        self.revoked.read().contains(&did.to_ascii_lowercase())
    }

    pub fn revoked(&self) -> Vec<String> {
        let mut dids: Vec<String> = self.revoked.read().iter().cloned().collect();
        dids.sort();
        dids
    }

    pub fn len(&self) -> usize {
        self.cards.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.read().is_empty()
    }
}
