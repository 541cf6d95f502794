//! # Peer Reputation
//!
//! Every exchange with a peer ends up here as a success, a failure or a
//! timeout. The counts roll up into a trust score the firewall checks
//! before letting the peer call anything:
//!
//! ```text
//! score = s / (s + 2f + 1.5t + 1)
//! ```
//!
//! A brand-new peer has no record at all, which is different from a peer
//! with a score of zero. The firewall skips the check for the former.

pub mod store;

pub use store::{trust_score, ReputationError, ReputationRecord, ReputationStore};

/// Hook for components that react to score changes (session invalidation,
/// metrics, ...).
pub trait ReputationObserver: Send + Sync {
    fn on_score_change(&self, peer_did: &str, score: f64);
}
