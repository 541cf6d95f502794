//! The publish / subscribe loops.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libp2p::PeerId;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Span};

use super::card::GossipCard;
use super::directory::{PeerDirectory, Upsert};
use super::verifier::CredentialVerifier;
use super::DiscoveryError;
use crate::config::DiscoveryConfig;
use crate::identity::{did_from_string, IdentityProvider};

/// Whatever carries gossip on the wire (libp2p gossipsub in the node, a
/// channel in tests).
#[async_trait]
pub trait GossipTransport: Send + Sync {
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), DiscoveryError>;
}

/// One received gossip message.
#[derive(Debug, Clone)]
pub struct GossipEnvelope {
    /// Original author, when the transport knows it.
    pub source: Option<PeerId>,
    pub data: Vec<u8>,
}

/// Why a received card went nowhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Malformed,
    EmptyDid,
    InvalidDid,
    Revoked,
    /// The transport says someone other than the card's peer sent it.
    SenderMismatch,
    PeerIdMismatch,
    BadSignature,
    MissingSignature,
    /// Stamped further in the future than the allowed clock skew.
    FutureTimestamp,
    InvalidCredential,
}

/// What became of a received card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// Our own card coming back to us.
    OwnCard,
    Dropped(DropReason),
    Stored(Upsert),
}

struct Inner {
    identity: Arc<IdentityProvider>,
    directory: Arc<PeerDirectory>,
    verifier: Option<Arc<dyn CredentialVerifier>>,
    transport: Arc<dyn GossipTransport>,
    local_card: RwLock<Option<GossipCard>>,
    config: DiscoveryConfig,
    span: Span,
}

/// Broadcasts the local card and ingests everyone else's.
pub struct GossipService {
    inner: Arc<Inner>,
    running: Mutex<Option<(watch::Sender<bool>, Vec<JoinHandle<()>>)>>,
}

impl GossipService {
    pub fn new(
        identity: Arc<IdentityProvider>,
        directory: Arc<PeerDirectory>,
        transport: Arc<dyn GossipTransport>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                identity,
                directory,
                verifier: None,
                transport,
                local_card: RwLock::new(None),
                config,
                span: info_span!("discovery"),
            }),
            running: Mutex::new(None),
        }
    }

    /// Must be called before `start`.
    pub fn with_verifier(mut self, verifier: Arc<dyn CredentialVerifier>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.verifier = Some(verifier);
        }
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.span = span;
        }
        self
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.inner.directory
    }

    /// Card to broadcast. It is re-stamped and re-signed on every publish.
    pub fn set_local_card(&self, card: GossipCard) {
        *self.inner.local_card.write() = Some(card);
    }

    pub fn local_card(&self) -> Option<GossipCard> {
        self.inner.local_card.read().clone()
    }

    /// Publish the local card once, now.
    pub async fn publish_now(&self) -> Result<(), DiscoveryError> {
        self.inner.publish().await
    }

    /// Run one received message through the pipeline.
    pub fn handle_envelope(&self, envelope: GossipEnvelope) -> Ingest {
        self.inner.ingest(envelope)
    }

    pub fn revoke_did(&self, did: &str) {
        info!(parent: &self.inner.span, did, "DID revoked");
        self.inner.directory.revoke_did(did);
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Spawn the publisher and the subscriber. A second call while
    /// running is ignored.
    pub fn start(&self, mut inbound: mpsc::Receiver<GossipEnvelope>) -> Result<(), DiscoveryError> {
        self.inner.config.validate()?;
        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(());
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let publisher = {
            let inner = Arc::clone(&self.inner);
            let mut shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                loop {
                    if let Err(e) = inner.publish().await {
                        warn!(parent: &inner.span, error = %e, "card publish failed");
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(inner.config.publish_interval()) => {}
                        _ = shutdown.changed() => {
                            debug!(parent: &inner.span, "publisher stopping");
                            return;
                        }
                    }
                }
            })
        };

        let subscriber = {
            let inner = Arc::clone(&self.inner);
            let mut shutdown = shutdown_rx;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        msg = inbound.recv() => match msg {
                            Some(envelope) => {
                                inner.ingest(envelope);
                            }
                            None => {
                                debug!(parent: &inner.span, "gossip channel closed");
                                return;
                            }
                        },
                        _ = shutdown.changed() => {
                            debug!(parent: &inner.span, "subscriber stopping");
                            return;
                        }
                    }
                }
            })
        };

        info!(parent: &self.inner.span, topic = %self.inner.config.topic, "discovery started");
        *running = Some((shutdown_tx, vec![publisher, subscriber]));
        Ok(())
    }

    /// Cancel both loops and wait for them to finish.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        if let Some((shutdown_tx, handles)) = running {
            let _ = shutdown_tx.send(true);
            for handle in handles {
                let _ = handle.await;
            }
            info!(parent: &self.inner.span, "discovery stopped");
        }
    }
}

impl std::fmt::Debug for GossipService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GossipService")
            .field("topic", &self.inner.config.topic)
            .field("peers", &self.inner.directory.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Inner {
    async fn publish(&self) -> Result<(), DiscoveryError> {
        let Some(mut card) = self.local_card.read().clone() else {
            return Ok(());
        };
        card.timestamp = Utc::now();
        card.sign(&self.identity)?;
        let data = serde_json::to_vec(&card)?;
        self.transport.publish(&self.config.topic, data).await?;
        debug!(parent: &self.span, did = %card.did, "card published");
        Ok(())
    }

    fn ingest(&self, envelope: GossipEnvelope) -> Ingest {
        let outcome = self.evaluate(envelope);
        if let Ingest::Dropped(reason) = outcome {
            debug!(parent: &self.span, ?reason, "gossip card dropped");
        }
        outcome
    }

    fn evaluate(&self, envelope: GossipEnvelope) -> Ingest {
        let local_peer = self.identity.did().ok().map(|d| d.peer_id());
        if local_peer.is_some() && envelope.source == local_peer {
            return Ingest::OwnCard;
        }

        let Ok(mut card) = serde_json::from_slice::<GossipCard>(&envelope.data) else {
            return Ingest::Dropped(DropReason::Malformed);
        };
        if local_peer.map(|p| p.to_string()).as_deref() == Some(card.peer_id.as_str()) {
            return Ingest::OwnCard;
        }
        if card.did.is_empty() {
            return Ingest::Dropped(DropReason::EmptyDid);
        }
        let Ok(did) = did_from_string(&card.did) else {
            return Ingest::Dropped(DropReason::InvalidDid);
        };
        if self.directory.is_revoked(did.id()) {
            info!(parent: &self.span, did = %card.did, "card from revoked DID ignored");
            return Ingest::Dropped(DropReason::Revoked);
        }
        // Gossipsub relays other peers' messages, but the author it reports
        // is signed; it has to be the card's own peer.
        if let Some(source) = &envelope.source {
            if source.to_string() != card.peer_id {
                warn!(parent: &self.span, did = %card.did, %source, "card relayed under a foreign source");
                return Ingest::Dropped(DropReason::SenderMismatch);
            }
        }
        if did.peer_id().to_string() != card.peer_id {
            return Ingest::Dropped(DropReason::PeerIdMismatch);
        }
        match card.verify_signature(&did) {
            Some(false) => return Ingest::Dropped(DropReason::BadSignature),
            None if self.config.require_signed_cards => {
                return Ingest::Dropped(DropReason::MissingSignature)
            }
            _ => {}
        }

        let now = Utc::now();
        let max_skew = chrono::Duration::from_std(self.config.max_clock_skew())
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        if card.timestamp > now + max_skew {
            warn!(parent: &self.span, did = %card.did, timestamp = %card.timestamp, "card from the future dropped");
            return Ingest::Dropped(DropReason::FutureTimestamp);
        }
        let max_age = chrono::Duration::from_std(self.config.max_credential_age())
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let mut kept = Vec::with_capacity(card.zk_credentials.len());
        for credential in std::mem::take(&mut card.zk_credentials) {
            if credential.is_expired(now) {
                debug!(parent: &self.span, did = %card.did, capability = %credential.capability_id, "expired credential skipped");
                continue;
            }
            if credential.is_stale(now, max_age) {
                warn!(
                    parent: &self.span,
                    did = %card.did,
                    capability = %credential.capability_id,
                    issued_at = %credential.issued_at,
                    "credential older than max age skipped"
                );
                continue;
            }
            if let Some(verifier) = &self.verifier {
                match verifier.verify(&card.did, &credential) {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(parent: &self.span, did = %card.did, capability = %credential.capability_id, "credential failed verification, card discarded");
                        return Ingest::Dropped(DropReason::InvalidCredential);
                    }
                    Err(e) => {
                        warn!(parent: &self.span, did = %card.did, error = %e, "credential unverifiable, card discarded");
                        return Ingest::Dropped(DropReason::InvalidCredential);
                    }
                }
            }
            kept.push(credential);
        }
        card.zk_credentials = kept;

        let did = card.did.clone();
        let result = self.directory.upsert(card);
        match result {
            Upsert::Inserted => info!(parent: &self.span, did = %did, "new peer discovered"),
            Upsert::Updated => debug!(parent: &self.span, did = %did, "peer card updated"),
            Upsert::Stale | Upsert::Revoked => {}
        }
        Ingest::Stored(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::card::ZkCredential;
    use crate::identity::{Ed25519Wallet, WalletProvider};
    use crate::zkp::{FieldElement, Proof, ProofScheme};
    use std::time::Duration;

    struct ChannelTransport(mpsc::UnboundedSender<(String, Vec<u8>)>);

    #[async_trait]
    impl GossipTransport for ChannelTransport {
        async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), DiscoveryError> {
            self.0
                .send((topic.to_string(), data))
                .map_err(|e| DiscoveryError::Transport(e.to_string()))
        }
    }

    struct Verdict(bool);

    impl CredentialVerifier for Verdict {
        fn verify(&self, _did: &str, _c: &ZkCredential) -> Result<bool, DiscoveryError> {
            Ok(self.0)
        }
    }

    fn identity(seed: u8) -> Arc<IdentityProvider> {
        let wallet: Arc<dyn WalletProvider> = Arc::new(Ed25519Wallet::from_seed(&[seed; 32]));
        Arc::new(IdentityProvider::new(wallet))
    }

    fn service(config: DiscoveryConfig) -> (GossipService, mpsc::UnboundedReceiver<(String, Vec<u8>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let svc = GossipService::new(
            identity(1),
            Arc::new(PeerDirectory::new()),
            Arc::new(ChannelTransport(tx)),
            config,
        );
        (svc, rx)
    }

    fn signed_card(seed: u8, caps: &[&str]) -> (GossipCard, Arc<IdentityProvider>) {
        let id = identity(seed);
        let mut card = GossipCard::new(format!("agent-{seed}"), &id.did().unwrap());
        card.capabilities = caps.iter().map(|c| c.to_string()).collect();
        card.sign(&id).unwrap();
        (card, id)
    }

    fn envelope(card: &GossipCard) -> GossipEnvelope {
        GossipEnvelope {
            source: None,
            data: serde_json::to_vec(card).unwrap(),
        }
    }

    fn credential(issued_ago: i64, expires_in: i64) -> ZkCredential {
        let now = Utc::now();
        ZkCredential {
            capability_id: "summarize".into(),
            proof: Proof {
                data: vec![0u8; 4],
                public_inputs: vec![FieldElement::from_u64(1)],
                circuit_id: "agent_capability".into(),
                scheme: ProofScheme::Groth16,
            },
            issued_at: now - chrono::Duration::seconds(issued_ago),
            expires_at: now + chrono::Duration::seconds(expires_in),
        }
    }

    #[test]
    fn test_valid_card_is_stored() {
        let (svc, _rx) = service(DiscoveryConfig::default());
        let (card, _) = signed_card(2, &["weather"]);
        assert_eq!(svc.handle_envelope(envelope(&card)), Ingest::Stored(Upsert::Inserted));
        assert_eq!(svc.directory().find_by_capability("weather").len(), 1);
        // Replayed copy of the same card is stale.
        assert_eq!(svc.handle_envelope(envelope(&card)), Ingest::Stored(Upsert::Stale));
    }

    #[test]
    fn test_drops() {
        let (svc, _rx) = service(DiscoveryConfig::default());

        let garbage = GossipEnvelope {
            source: None,
            data: b"{not json".to_vec(),
        };
        assert_eq!(svc.handle_envelope(garbage), Ingest::Dropped(DropReason::Malformed));

        let (mut card, _) = signed_card(2, &[]);
        card.did = String::new();
        assert_eq!(svc.handle_envelope(envelope(&card)), Ingest::Dropped(DropReason::EmptyDid));

        let (mut card, _) = signed_card(2, &[]);
        card.peer_id = PeerId::random().to_string();
        assert_eq!(
            svc.handle_envelope(envelope(&card)),
            Ingest::Dropped(DropReason::PeerIdMismatch)
        );

        let (mut card, _) = signed_card(2, &[]);
        card.name = "tampered".into();
        assert_eq!(svc.handle_envelope(envelope(&card)), Ingest::Dropped(DropReason::BadSignature));

        let (mut card, _) = signed_card(2, &[]);
        card.signature = None;
        assert_eq!(
            svc.handle_envelope(envelope(&card)),
            Ingest::Dropped(DropReason::MissingSignature)
        );
        assert!(svc.directory().is_empty());
    }

    #[test]
    fn test_own_card_ignored() {
        let (svc, _rx) = service(DiscoveryConfig::default());
        let (card, _) = signed_card(1, &[]);
        assert_eq!(svc.handle_envelope(envelope(&card)), Ingest::OwnCard);

        let own_peer = identity(1).did().unwrap().peer_id();
        let (other, _) = signed_card(2, &[]);
        let env = GossipEnvelope {
            source: Some(own_peer),
            data: serde_json::to_vec(&other).unwrap(),
        };
        assert_eq!(svc.handle_envelope(env), Ingest::OwnCard);
    }

    #[test]
    fn test_revoked_did_dropped() {
        let (svc, _rx) = service(DiscoveryConfig::default());
        let (card, _) = signed_card(2, &[]);
        svc.handle_envelope(envelope(&card));
        svc.revoke_did(&card.did);
        assert!(svc.directory().get(&card.did).is_none());

        let (newer, _) = signed_card(2, &[]);
        assert_eq!(svc.handle_envelope(envelope(&newer)), Ingest::Dropped(DropReason::Revoked));
    }

    #[test]
    fn test_revocation_survives_case_games() {
        let (svc, _rx) = service(DiscoveryConfig::default());
        let (card, id) = signed_card(2, &[]);
        svc.handle_envelope(envelope(&card));
        svc.revoke_did(&card.did);

        // Same key, hex shouted: not a distinct DID, and still dropped.
        let mut shouted = card.clone();
        shouted.did = format!(
            "did:lango:{}",
            card.did.trim_start_matches("did:lango:").to_uppercase()
        );
        shouted.timestamp = Utc::now() + chrono::Duration::seconds(1);
        shouted.sign(&id).unwrap();
        assert!(matches!(
            svc.handle_envelope(envelope(&shouted)),
            Ingest::Dropped(DropReason::InvalidDid | DropReason::Revoked)
        ));
        assert!(svc.directory().is_empty());
    }

    #[test]
    fn test_foreign_source_cannot_overwrite_a_card() {
        let (svc, _rx) = service(DiscoveryConfig::default());
        let (victim, _) = signed_card(2, &["summarize"]);
        let victim_peer: PeerId = victim.peer_id.parse().unwrap();
        let honest = GossipEnvelope {
            source: Some(victim_peer),
            data: serde_json::to_vec(&victim).unwrap(),
        };
        assert_eq!(svc.handle_envelope(honest), Ingest::Stored(Upsert::Inserted));

        // Mallory republishes the victim's DID with her own endpoints, an
        // unsigned body, and a timestamp ten years out.
        let mallory = identity(3).did().unwrap().peer_id();
        let mut forged = victim.clone();
        forged.signature = None;
        forged.multiaddrs = vec!["/ip4/6.6.6.6/tcp/9740".into()];
        forged.timestamp = Utc::now() + chrono::Duration::days(3650);
        let hijack = GossipEnvelope {
            source: Some(mallory),
            data: serde_json::to_vec(&forged).unwrap(),
        };
        assert_eq!(
            svc.handle_envelope(hijack),
            Ingest::Dropped(DropReason::SenderMismatch)
        );

        // Without a transport source the missing signature still stops it.
        assert_eq!(
            svc.handle_envelope(envelope(&forged)),
            Ingest::Dropped(DropReason::MissingSignature)
        );
        assert_eq!(
            svc.directory().get(&victim.did).unwrap().multiaddrs,
            victim.multiaddrs
        );
    }

    #[test]
    fn test_future_dated_card_dropped() {
        let (svc, _rx) = service(DiscoveryConfig::default());
        let (mut card, id) = signed_card(2, &[]);
        card.timestamp = Utc::now() + chrono::Duration::days(3650);
        card.sign(&id).unwrap();
        assert_eq!(
            svc.handle_envelope(envelope(&card)),
            Ingest::Dropped(DropReason::FutureTimestamp)
        );

        // A little drift is tolerated.
        card.timestamp = Utc::now() + chrono::Duration::seconds(30);
        card.sign(&id).unwrap();
        assert_eq!(svc.handle_envelope(envelope(&card)), Ingest::Stored(Upsert::Inserted));
    }

    #[tokio::test]
    async fn test_zero_interval_refused_at_start() {
        let (svc, _rx) = service(DiscoveryConfig {
            publish_interval_secs: 0,
            ..DiscoveryConfig::default()
        });
        let (_tx, inbound_rx) = mpsc::channel(1);
        assert!(matches!(svc.start(inbound_rx), Err(DiscoveryError::Config(_))));
        assert!(!svc.is_running());
    }

    #[test]
    fn test_credential_pipeline() {
        let (svc, _rx) = service(DiscoveryConfig {
            max_credential_age_secs: 3600,
            ..DiscoveryConfig::default()
        });
        let svc = svc.with_verifier(Arc::new(Verdict(true)));

        let (mut card, id) = signed_card(2, &["summarize"]);
        card.zk_credentials = vec![
            credential(10, 3600),    // good
            credential(10, -1),      // expired
            credential(7200, 3600),  // too old
        ];
        card.sign(&id).unwrap();
        assert_eq!(svc.handle_envelope(envelope(&card)), Ingest::Stored(Upsert::Inserted));
        assert_eq!(svc.directory().get(&card.did).unwrap().zk_credentials.len(), 1);
    }

    #[test]
    fn test_failed_credential_discards_card() {
        let (svc, _rx) = service(DiscoveryConfig::default());
        let svc = svc.with_verifier(Arc::new(Verdict(false)));

        let (mut card, id) = signed_card(2, &[]);
        card.zk_credentials = vec![credential(10, 3600)];
        card.sign(&id).unwrap();
        assert_eq!(
            svc.handle_envelope(envelope(&card)),
            Ingest::Dropped(DropReason::InvalidCredential)
        );
        assert!(svc.directory().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loops_publish_ingest_and_stop() {
        let (svc, mut published) = service(DiscoveryConfig {
            publish_interval_secs: 10,
            ..DiscoveryConfig::default()
        });
        let local = identity(1).did().unwrap();
        svc.set_local_card(GossipCard::new("me", &local));

        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        svc.start(inbound_rx).unwrap();
        assert!(svc.is_running());

        // Immediate publish, then one per interval.
        let (topic, first) = published.recv().await.unwrap();
        assert_eq!(topic, crate::config::GOSSIP_TOPIC);
        let first: GossipCard = serde_json::from_slice(&first).unwrap();
        assert_eq!(first.verify_signature(&local), Some(true));
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(published.recv().await.is_some());

        let (card, _) = signed_card(3, &["search"]);
        inbound_tx.send(envelope(&card)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(svc.directory().get(&card.did).is_some());

        svc.stop().await;
        assert!(!svc.is_running());
    }
}
