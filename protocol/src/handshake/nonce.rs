//! # Nonce Replay Cache
//!
//! Every challenge nonce a responder accepts is remembered for
//! `2 × handshake timeout`. A second response carrying the same nonce
//! inside that window is a replay, full stop.
//!
//! ```text
//!   check_and_insert(n) ──► live entry?  ──yes──► false (replay)
//!                               │
//!                               no (absent or expired)
//!                               ▼
//!                        insert(n, now + ttl) ──► true
//! ```
//!
//! Expired entries are dropped by a background sweeper, which also purges
//! expired sessions so the two maps shrink on the same schedule.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info_span, Span};

use super::message::Nonce;
use super::session::SessionStore;

/// Replay cache keyed by nonce value.
pub struct NonceCache {
    entries: DashMap<Nonce, Instant>,
    ttl: Duration,
    sweeper: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
    span: Span,
}

impl NonceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            sweeper: Mutex::new(None),
            span: info_span!("nonce_cache"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record `nonce` as seen. Returns `false` if it was already seen and
    /// hasn't expired yet.
    pub fn check_and_insert(&self, nonce: &Nonce) -> bool {
        let now = Instant::now();
        match self.entries.entry(*nonce) {
            Entry::Occupied(mut e) => {
                if *e.get() > now {
                    return false;
                }
                e.insert(now + self.ttl);
                true
            }
            Entry::Vacant(e) => {
                e.insert(now + self.ttl);
                true
            }
        }
    }

    /// Whether `nonce` is currently inside its replay window.
    pub fn contains(&self, nonce: &Nonce) -> bool {
        self.entries
            .get(nonce)
            .map(|expires| *expires > Instant::now())
            .unwrap_or(false)
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, expires| *expires > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawn the periodic sweeper. Calling it twice is a no-op.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration, sessions: Option<Arc<SessionStore>>) {
        let mut slot = self.sweeper.lock();
        if slot.is_some() {
            return;
        }

        let (shutdown_tx, mut shutdown) = watch::channel(false);
        let cache = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => {
                        debug!(parent: &cache.span, "nonce sweeper stopping");
                        return;
                    }
                }

                let nonces = cache.sweep();
                let expired_sessions = sessions.as_ref().map(|s| s.purge_expired()).unwrap_or(0);
                if nonces > 0 || expired_sessions > 0 {
                    debug!(
                        parent: &cache.span,
                        nonces,
                        sessions = expired_sessions,
                        "swept expired entries"
                    );
                }
            }
        });
        *slot = Some((shutdown_tx, handle));
    }

    /// Stop the sweeper and wait for it to exit.
    pub async fn stop(&self) {
        let running = self.sweeper.lock().take();
        if let Some((shutdown_tx, handle)) = running {
            let _ = shutdown_tx.send(true);
            let _ = handle.await;
        }
    }
}

impl std::fmt::Debug for NonceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceCache")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}
