//! sled-backed reputation records.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use tracing::{debug, info_span, Span};

use super::ReputationObserver;
use crate::firewall::ReputationSource;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ReputationError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type ReputationResult<T> = Result<T, ReputationError>;

const REPUTATION_TREE: &str = "reputation";

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// Everything we remember about how a peer has behaved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationRecord {
    pub peer_did: String,
    pub trust_score: f64,
    pub successful_exchanges: u64,
    pub failed_exchanges: u64,
    pub timeout_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_interaction: DateTime<Utc>,
}

impl ReputationRecord {
    fn new(peer_did: &str) -> Self {
        let now = Utc::now();
        Self {
            peer_did: peer_did.to_string(),
            trust_score: 0.0,
            successful_exchanges: 0,
            failed_exchanges: 0,
            timeout_count: 0,
            first_seen: now,
            last_interaction: now,
        }
    }

    fn rescore(&mut self) {
        self.trust_score = trust_score(
            self.successful_exchanges,
            self.failed_exchanges,
            self.timeout_count,
        );
        self.last_interaction = Utc::now();
    }
}

/// `s / (s + 2f + 1.5t + 1)`. Failures weigh double, timeouts one and a
/// half. Always in `[0, 1)`.
pub fn trust_score(successes: u64, failures: u64, timeouts: u64) -> f64 {
    let s = successes as f64;
    let f = failures as f64;
    let t = timeouts as f64;
    s / (s + 2.0 * f + 1.5 * t + 1.0)
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Success,
    Failure,
    Timeout,
}

// ---------------------------------------------------------------------------
// ReputationStore
// ---------------------------------------------------------------------------

/// Persistent reputation table.
///
/// | Tree         | Key               | Value                      |
/// |--------------|-------------------|----------------------------|
/// | `reputation` | peer DID (UTF-8)  | `bincode(ReputationRecord)`|
///
/// Writes go through a mutex so concurrent read-modify-write cycles for
/// the same peer don't lose updates. Reads hit sled directly.
pub struct ReputationStore {
    db: Db,
    records: Tree,
    write_lock: Mutex<()>,
    observers: RwLock<Vec<Arc<dyn ReputationObserver>>>,
    span: Span,
}

impl ReputationStore {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> ReputationResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory store, gone when dropped.
    pub fn open_temporary() -> ReputationResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> ReputationResult<Self> {
        let records = db.open_tree(REPUTATION_TREE)?;
        Ok(Self {
            db,
            records,
            write_lock: Mutex::new(()),
            observers: RwLock::new(Vec::new()),
            span: info_span!("reputation"),
        })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Get told about every score change.
    pub fn add_observer(&self, observer: Arc<dyn ReputationObserver>) {
        self.observers.write().push(observer);
    }

    pub fn record_success(&self, peer_did: &str) -> ReputationResult<f64> {
        self.record(peer_did, Outcome::Success)
    }

    pub fn record_failure(&self, peer_did: &str) -> ReputationResult<f64> {
        self.record(peer_did, Outcome::Failure)
    }

    pub fn record_timeout(&self, peer_did: &str) -> ReputationResult<f64> {
        self.record(peer_did, Outcome::Timeout)
    }

    fn record(&self, peer_did: &str, outcome: Outcome) -> ReputationResult<f64> {
        let record = {
            let _guard = self.write_lock.lock();
            let mut record = self
                .get(peer_did)?
                .unwrap_or_else(|| ReputationRecord::new(peer_did));
            match outcome {
                Outcome::Success => record.successful_exchanges += 1,
                Outcome::Failure => record.failed_exchanges += 1,
                Outcome::Timeout => record.timeout_count += 1,
            }
            record.rescore();

            let bytes = bincode::serialize(&record)
                .map_err(|e| ReputationError::Serialization(e.to_string()))?;
            self.records.insert(peer_did.as_bytes(), bytes)?;
            record
        };

        debug!(
            parent: &self.span,
            peer = peer_did,
            ?outcome,
            score = record.trust_score,
            "reputation updated"
        );

        // Observers run outside the write lock; they may call back in.
        let observers = self.observers.read().clone();
        for observer in observers {
            observer.on_score_change(peer_did, record.trust_score);
        }
        Ok(record.trust_score)
    }

    pub fn get(&self, peer_did: &str) -> ReputationResult<Option<ReputationRecord>> {
        match self.records.get(peer_did.as_bytes())? {
            Some(bytes) => {
                let record = bincode::deserialize(&bytes)
                    .map_err(|e| ReputationError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Current score, `None` for peers we've never dealt with.
    pub fn trust_score(&self, peer_did: &str) -> ReputationResult<Option<f64>> {
        Ok(self.get(peer_did)?.map(|r| r.trust_score))
    }

    /// Every record, ordered by DID.
    pub fn all(&self) -> ReputationResult<Vec<ReputationRecord>> {
        self.records
            .iter()
            .values()
            .map(|bytes| {
                let bytes = bytes?;
                bincode::deserialize(&bytes)
                    .map_err(|e| ReputationError::Serialization(e.to_string()))
            })
            .collect()
    }

    pub fn flush(&self) -> ReputationResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl ReputationSource for ReputationStore {
    fn trust_score(&self, peer_did: &str) -> Option<f64> {
        match ReputationStore::trust_score(self, peer_did) {
            Ok(score) => score,
            Err(e) => {
                // An unreadable record is treated like an unknown peer.
                tracing::warn!(parent: &self.span, peer = peer_did, error = %e, "reputation read failed");
                None
            }
        }
    }
}

impl std::fmt::Debug for ReputationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReputationStore")
            .field("records", &self.records.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_score_formula() {
        assert_eq!(trust_score(0, 0, 0), 0.0);
        assert_eq!(trust_score(1, 0, 0), 0.5);
        assert_eq!(trust_score(9, 0, 0), 0.9);
        // 4 / (4 + 2 + 1.5 + 1)
        assert!((trust_score(4, 1, 1) - 4.0 / 8.5).abs() < 1e-12);
    }

    #[test]
    fn test_record_and_read_back() {
        let store = ReputationStore::open_temporary().unwrap();
        assert!(store.get("did:lango:aa").unwrap().is_none());
        assert_eq!(store.trust_score("did:lango:aa").unwrap(), None);

        store.record_success("did:lango:aa").unwrap();
        store.record_success("did:lango:aa").unwrap();
        let score = store.record_failure("did:lango:aa").unwrap();
        assert!((score - 2.0 / 5.0).abs() < 1e-12);
        store.record_timeout("did:lango:bb").unwrap();

        let rec = store.get("did:lango:aa").unwrap().unwrap();
        assert_eq!(rec.successful_exchanges, 2);
        assert_eq!(rec.failed_exchanges, 1);
        assert!(rec.last_interaction >= rec.first_seen);

        let all = store.all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].peer_did, "did:lango:aa");
        assert_eq!(all[1].timeout_count, 1);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ReputationStore::open(dir.path()).unwrap();
            store.record_success("did:lango:aa").unwrap();
            store.flush().unwrap();
        }
        let store = ReputationStore::open(dir.path()).unwrap();
        let rec = store.get("did:lango:aa").unwrap().unwrap();
        assert_eq!(rec.successful_exchanges, 1);
        assert_eq!(rec.trust_score, 0.5);
    }

    struct Counter(AtomicUsize);

    impl ReputationObserver for Counter {
        fn on_score_change(&self, _peer_did: &str, _score: f64) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_observers_see_every_change() {
        let store = ReputationStore::open_temporary().unwrap();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        store.add_observer(counter.clone());

        store.record_success("did:lango:aa").unwrap();
        store.record_failure("did:lango:aa").unwrap();
        store.record_timeout("did:lango:bb").unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_reputation_source_hides_unknown_peers() {
        let store = ReputationStore::open_temporary().unwrap();
        let source: &dyn ReputationSource = &store;
        assert_eq!(source.trust_score("did:lango:zz"), None);
        store.record_failure("did:lango:zz").unwrap();
        assert_eq!(source.trust_score("did:lango:zz"), Some(0.0));
    }
}
