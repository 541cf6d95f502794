//! Session invalidation on repeated auth failures or falling reputation.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info_span, warn, Span};

use super::session::SessionStore;
use crate::reputation::ReputationObserver;

/// Why a session was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationReason {
    RepeatedAuthFailures,
    ReputationDrop,
}

/// Counts consecutive authentication failures per peer and kills the
/// peer's session when they pile up. Also listens to reputation changes.
pub struct SecurityEventHandler {
    sessions: Arc<SessionStore>,
    failures: DashMap<String, u32>,
    max_failures: u32,
    min_trust_score: f64,
    span: Span,
}

impl SecurityEventHandler {
    pub fn new(sessions: Arc<SessionStore>, max_failures: u32, min_trust_score: f64) -> Self {
        Self {
            sessions,
            failures: DashMap::new(),
            max_failures: max_failures.max(1),
            min_trust_score,
            span: info_span!("security"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Count a failure. Returns `true` if this one invalidated the session.
    ///
    /// `peer_did` must be bound to the transport's authenticated peer ID,
    /// otherwise any stranger can exhaust another peer's failure budget.
    pub fn record_auth_failure(&self, peer_did: &str) -> bool {
        let count = {
            let mut entry = self.failures.entry(peer_did.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };

        if count >= self.max_failures {
            self.failures.remove(peer_did);
            self.invalidate(peer_did, InvalidationReason::RepeatedAuthFailures);
            return true;
        }
        false
    }

    pub fn record_auth_success(&self, peer_did: &str) {
        self.failures.remove(peer_did);
    }

    pub fn failure_count(&self, peer_did: &str) -> u32 {
        self.failures.get(peer_did).map(|c| *c).unwrap_or(0)
    }

    fn invalidate(&self, peer_did: &str, reason: InvalidationReason) {
        let had_session = self.sessions.remove(peer_did).is_some();
        warn!(parent: &self.span, peer = peer_did, ?reason, had_session, "session invalidated");
    }
}

impl ReputationObserver for SecurityEventHandler {
    fn on_score_change(&self, peer_did: &str, score: f64) {
        if score < self.min_trust_score && self.sessions.has_live_session(peer_did) {
            self.invalidate(peer_did, InvalidationReason::ReputationDrop);
        }
    }
}

impl std::fmt::Debug for SecurityEventHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityEventHandler")
            .field("max_failures", &self.max_failures)
            .field("min_trust_score", &self.min_trust_score)
            .field("tracked_peers", &self.failures.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::HandshakeProtocol;
    use crate::reputation::ReputationStore;
    use std::time::Duration;

    fn setup(max: u32) -> (Arc<SessionStore>, SecurityEventHandler) {
        let sessions = Arc::new(SessionStore::new(Duration::from_secs(3600)));
        let handler = SecurityEventHandler::new(Arc::clone(&sessions), max, 0.3);
        (sessions, handler)
    }

    #[test]
    fn test_invalidates_after_n_failures() {
        let (sessions, handler) = setup(3);
        sessions.create("did:lango:aa", false, HandshakeProtocol::V1_1);

        assert!(!handler.record_auth_failure("did:lango:aa"));
        assert!(!handler.record_auth_failure("did:lango:aa"));
        assert!(sessions.has_live_session("did:lango:aa"));
        assert!(handler.record_auth_failure("did:lango:aa"));
        assert!(!sessions.has_live_session("did:lango:aa"));
        assert_eq!(handler.failure_count("did:lango:aa"), 0);
    }

    #[test]
    fn test_success_resets_counter() {
        let (sessions, handler) = setup(2);
        sessions.create("did:lango:aa", false, HandshakeProtocol::V1_1);

        handler.record_auth_failure("did:lango:aa");
        handler.record_auth_success("did:lango:aa");
        assert!(!handler.record_auth_failure("did:lango:aa"));
        assert!(sessions.has_live_session("did:lango:aa"));
    }

    #[test]
    fn test_reputation_drop_kills_session() {
        let (sessions, handler) = setup(5);
        let handler = Arc::new(handler);
        let store = ReputationStore::open_temporary().unwrap();
        store.add_observer(handler.clone());

        sessions.create("did:lango:aa", false, HandshakeProtocol::V1_1);
        store.record_success("did:lango:aa").unwrap();
        store.record_success("did:lango:aa").unwrap();
        assert!(sessions.has_live_session("did:lango:aa"));

        // 2 / (2 + 4 + 1) ≈ 0.29
        store.record_failure("did:lango:aa").unwrap();
        store.record_failure("did:lango:aa").unwrap();
        assert!(!sessions.has_live_session("did:lango:aa"));
    }
}
