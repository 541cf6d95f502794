//! Authenticated sessions, one per peer DID.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, Span};

use super::message::HandshakeProtocol;

/// A live authenticated relationship with a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub peer_did: String,
    pub token: String,
    /// The peer proved wallet ownership with a ZK proof, not a signature.
    pub zk_verified: bool,
    pub protocol: HandshakeProtocol,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

fn new_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Session table keyed by peer DID.
///
/// A newer handshake with the same peer replaces the old session. Expired
/// entries are evicted lazily on lookup and by [`SessionStore::purge_expired`].
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    ttl: chrono::Duration,
    span: Span,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500)),
            span: info_span!("sessions"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Open a fresh session for `peer_did`, replacing any previous one.
    pub fn create(&self, peer_did: &str, zk_verified: bool, protocol: HandshakeProtocol) -> Session {
        let now = Utc::now();
        let session = Session {
            peer_did: peer_did.to_string(),
            token: new_token(),
            zk_verified,
            protocol,
            created_at: now,
            expires_at: now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        self.sessions.insert(peer_did.to_string(), session.clone());
        debug!(parent: &self.span, peer = peer_did, zk_verified, %protocol, "session created");
        session
    }

    /// Store a session issued by a remote responder.
    pub fn insert(&self, session: Session) {
        self.sessions.insert(session.peer_did.clone(), session);
    }

    /// Live session for `peer_did`. Expired entries are removed on the way.
    pub fn get(&self, peer_did: &str) -> Option<Session> {
        let session = self.sessions.get(peer_did)?.clone();
        if session.is_expired() {
            self.sessions
                .remove_if(peer_did, |_, s| s.token == session.token);
            return None;
        }
        Some(session)
    }

    /// Whether `token` is the live session token for `peer_did`.
    pub fn validate(&self, peer_did: &str, token: &str) -> bool {
        self.get(peer_did)
            .map(|s| s.token == token)
            .unwrap_or(false)
    }

    pub fn has_live_session(&self, peer_did: &str) -> bool {
        self.get(peer_did).is_some()
    }

    pub fn remove(&self, peer_did: &str) -> Option<Session> {
        let removed = self.sessions.remove(peer_did).map(|(_, s)| s);
        if removed.is_some() {
            debug!(parent: &self.span, peer = peer_did, "session removed");
        }
        removed
    }

    /// Drop every expired session. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.expires_at > now);
        before - self.sessions.len()
    }

    /// Live sessions, sorted by peer DID.
    pub fn list(&self) -> Vec<Session> {
        let mut live: Vec<Session> = self
            .sessions
            .iter()
            .filter(|s| !s.is_expired())
            .map(|s| s.value().clone())
            .collect();
        live.sort_by(|a, b| a.peer_did.cmp(&b.peer_did));
        live
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.sessions.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}
