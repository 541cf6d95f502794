//! # Handshake over request/response
//!
//! Each handshake version is its own libp2p request/response protocol, so
//! the transport has already negotiated the version and authenticated the
//! remote peer ID before a single handshake message is read. A handshake
//! is two round trips:
//!
//! ```text
//!  Initiator                                   Responder (ProtocolRouter)
//!  request  Hello     ────────────────────────► Responder::on_hello
//!  response Challenge ◄──────────────────────── parked under (peer, version)
//!  request  Response  ────────────────────────► Responder::on_response
//!  response Ack       ◄──────────────────────── session created
//!           | Reject
//! ```
//!
//! The router keys half-finished handshakes by the authenticated peer ID,
//! which is also what every responder checks the claimed DID against.
//! Parked responders expire after the handshake timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use libp2p::PeerId;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::error::HandshakeError;
use super::machine::{HandshakeContext, Initiator, Responder};
use super::message::{Challenge, HandshakeAck, HandshakeMessage, HandshakeProtocol, HandshakeReject};
use super::session::Session;
use crate::config::PENDING_HANDSHAKE_LIMIT;

/// Sends one handshake message to `peer` over `protocol` and returns the
/// reply. The node implements this on its swarm handle.
#[async_trait]
pub trait HandshakeTransport: Send + Sync {
    async fn exchange(
        &self,
        peer: PeerId,
        protocol: HandshakeProtocol,
        message: HandshakeMessage,
    ) -> Result<HandshakeMessage, HandshakeError>;
}

/// Resolves once `cancel` flips to `true`. A dropped sender never cancels.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Initiator
// ---------------------------------------------------------------------------

/// Run the initiator side against `peer`. The responder's DID must derive
/// `peer`, so a dial to the wrong node fails authentication.
pub async fn initiate(
    transport: &dyn HandshakeTransport,
    ctx: Arc<HandshakeContext>,
    protocol: HandshakeProtocol,
    peer: PeerId,
    mut cancel: watch::Receiver<bool>,
) -> Result<Session, HandshakeError> {
    let timeout = ctx.config.timeout();
    let mut machine = Initiator::new(Arc::clone(&ctx), protocol, Some(peer));
    tokio::select! {
        r = tokio::time::timeout(timeout, run_initiator(transport, peer, &mut machine)) => match r {
            Ok(inner) => inner,
            Err(_) => Err(HandshakeError::HandshakeTimeout(timeout)),
        },
        _ = cancelled(&mut cancel) => Err(HandshakeError::Cancelled),
    }
}

async fn run_initiator(
    transport: &dyn HandshakeTransport,
    peer: PeerId,
    machine: &mut Initiator,
) -> Result<Session, HandshakeError> {
    let protocol = machine.protocol();
    let hello = HandshakeMessage::Hello(machine.hello()?);
    let challenge = match transport.exchange(peer, protocol, hello).await? {
        HandshakeMessage::Challenge(c) => c,
        HandshakeMessage::Reject(r) => return Err(HandshakeError::Rejected(r.reason)),
        other => {
            return Err(HandshakeError::ProtocolViolation(format!(
                "expected challenge, got {}",
                other.kind()
            )))
        }
    };
    let response = HandshakeMessage::Response(machine.on_challenge(challenge)?);
    let verdict = transport.exchange(peer, protocol, response).await?;
    machine.on_result(verdict)
}

// ---------------------------------------------------------------------------
// Responder
// ---------------------------------------------------------------------------

/// A handshake we accepted.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub peer: PeerId,
    pub peer_did: String,
    pub protocol: HandshakeProtocol,
    pub ack: HandshakeAck,
    /// From the hello arriving to the session existing.
    pub elapsed: Duration,
}

/// Where an inbound request left the handshake.
#[derive(Debug, Clone)]
pub enum Step {
    /// Hello accepted; send the challenge back.
    Challenge(Challenge),
    /// Response verified; the session exists.
    Accepted(Accepted),
}

impl Step {
    /// The reply to put on the wire.
    pub fn into_message(self) -> HandshakeMessage {
        match self {
            Step::Challenge(c) => HandshakeMessage::Challenge(c),
            Step::Accepted(a) => HandshakeMessage::Ack(a.ack),
        }
    }
}

/// The reply for a failed request.
pub fn reject_message(error: &HandshakeError) -> HandshakeMessage {
    HandshakeMessage::Reject(HandshakeReject {
        reason: error.to_string(),
    })
}

struct Parked {
    responder: Responder,
    started: Instant,
    deadline: Instant,
}

/// Dispatches inbound handshake requests by protocol ID and keeps each
/// peer's responder between its hello and its response.
///
/// [`ProtocolRouter::new`] registers both handshake versions; a node that
/// wants to stop speaking the legacy one can `unregister` it.
pub struct ProtocolRouter {
    ctx: Arc<HandshakeContext>,
    handlers: RwLock<HashMap<String, HandshakeProtocol>>,
    pending: Mutex<HashMap<(PeerId, HandshakeProtocol), Parked>>,
}

impl ProtocolRouter {
    pub fn new(ctx: Arc<HandshakeContext>) -> Self {
        let router = Self {
            ctx,
            handlers: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        };
        router.register(HandshakeProtocol::V1_0);
        router.register(HandshakeProtocol::V1_1);
        router
    }

    pub fn register(&self, protocol: HandshakeProtocol) {
        self.handlers.write().insert(protocol.id().to_string(), protocol);
    }

    pub fn unregister(&self, protocol: HandshakeProtocol) -> bool {
        self.handlers.write().remove(protocol.id()).is_some()
    }

    pub fn supports(&self, protocol_id: &str) -> bool {
        self.handlers.read().contains_key(protocol_id)
    }

    /// Registered protocol IDs, sorted.
    pub fn protocols(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn context(&self) -> &Arc<HandshakeContext> {
        &self.ctx
    }

    /// Handshakes waiting for their response.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Handle one request from the transport-authenticated `peer`.
    pub async fn on_request(
        &self,
        peer: PeerId,
        protocol_id: &str,
        message: HandshakeMessage,
    ) -> Result<Step, HandshakeError> {
        let protocol = self.handlers.read().get(protocol_id).copied();
        let Some(protocol) = protocol else {
            return Err(HandshakeError::UnsupportedProtocol(protocol_id.to_string()));
        };

        match message {
            HandshakeMessage::Hello(hello) => {
                self.evict_expired();
                if self.pending.lock().len() >= PENDING_HANDSHAKE_LIMIT {
                    warn!(parent: &self.ctx.span, %peer, "too many pending handshakes, hello refused");
                    return Err(HandshakeError::ProtocolViolation("responder busy".into()));
                }
                debug!(parent: &self.ctx.span, %peer, protocol = %protocol, "inbound handshake");
                let started = Instant::now();
                let mut responder = Responder::new(Arc::clone(&self.ctx), protocol, Some(peer));
                let challenge = responder.on_hello(hello).await?;
                let parked = Parked {
                    responder,
                    started,
                    deadline: started + self.ctx.config.timeout(),
                };
                // A second hello from the same peer starts over.
                self.pending.lock().insert((peer, protocol), parked);
                Ok(Step::Challenge(challenge))
            }
            HandshakeMessage::Response(response) => {
                let parked = self.pending.lock().remove(&(peer, protocol));
                let Some(mut parked) = parked else {
                    return Err(HandshakeError::ProtocolViolation(
                        "response without a pending challenge".into(),
                    ));
                };
                if Instant::now() > parked.deadline {
                    return Err(HandshakeError::HandshakeTimeout(self.ctx.config.timeout()));
                }
                let ack = parked.responder.on_response(response)?;
                Ok(Step::Accepted(Accepted {
                    peer,
                    peer_did: parked.responder.initiator_did().unwrap_or_default().to_string(),
                    protocol,
                    ack,
                    elapsed: parked.started.elapsed(),
                }))
            }
            other => Err(HandshakeError::ProtocolViolation(format!(
                "unexpected {} request",
                other.kind()
            ))),
        }
    }

    /// [`on_request`](Self::on_request) with errors turned into a reject.
    pub async fn respond(
        &self,
        peer: PeerId,
        protocol_id: &str,
        message: HandshakeMessage,
    ) -> (HandshakeMessage, Result<Option<Accepted>, HandshakeError>) {
        match self.on_request(peer, protocol_id, message).await {
            Ok(Step::Accepted(accepted)) => (
                HandshakeMessage::Ack(accepted.ack.clone()),
                Ok(Some(accepted)),
            ),
            Ok(step) => (step.into_message(), Ok(None)),
            Err(e) => (reject_message(&e), Err(e)),
        }
    }

    fn evict_expired(&self) {
        let now = Instant::now();
        self.pending.lock().retain(|_, parked| parked.deadline >= now);
    }
}

impl std::fmt::Debug for ProtocolRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolRouter")
            .field("protocols", &self.protocols())
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HandshakeConfig;
    use crate::identity::{Ed25519Wallet, IdentityProvider, WalletProvider};
    use std::time::Duration;

    fn context(seed: u8, config: HandshakeConfig) -> Arc<HandshakeContext> {
        let wallet: Arc<dyn WalletProvider> = Arc::new(Ed25519Wallet::from_seed(&[seed; 32]));
        Arc::new(HandshakeContext::new(
            Arc::new(IdentityProvider::new(wallet)),
            config,
        ))
    }

    fn peer_of(ctx: &HandshakeContext) -> PeerId {
        ctx.identity.did().unwrap().peer_id()
    }

    /// Delivers requests straight into a router, as `from`.
    struct Direct {
        router: Arc<ProtocolRouter>,
        from: PeerId,
    }

    #[async_trait]
    impl HandshakeTransport for Direct {
        async fn exchange(
            &self,
            _peer: PeerId,
            protocol: HandshakeProtocol,
            message: HandshakeMessage,
        ) -> Result<HandshakeMessage, HandshakeError> {
            Ok(self.router.respond(self.from, protocol.id(), message).await.0)
        }
    }

    struct Silent;

    #[async_trait]
    impl HandshakeTransport for Silent {
        async fn exchange(
            &self,
            _peer: PeerId,
            _protocol: HandshakeProtocol,
            _message: HandshakeMessage,
        ) -> Result<HandshakeMessage, HandshakeError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_both_versions_coexist() {
        let alice = context(1, HandshakeConfig::default());
        let bob = context(2, HandshakeConfig::default());
        let router = Arc::new(ProtocolRouter::new(bob.clone()));
        assert_eq!(router.protocols().len(), 2);
        let wire = Direct {
            router: Arc::clone(&router),
            from: peer_of(&alice),
        };

        for protocol in [HandshakeProtocol::V1_0, HandshakeProtocol::V1_1] {
            let (_tx, rx) = watch::channel(false);
            let session = initiate(&wire, alice.clone(), protocol, peer_of(&bob), rx)
                .await
                .unwrap();

            assert_eq!(session.protocol, protocol);
            assert_eq!(session.peer_did, bob.identity.did().unwrap().id());
            let alice_did = alice.identity.did().unwrap();
            assert!(bob.sessions.validate(alice_did.id(), &session.token));
            assert_eq!(bob.sessions.get(alice_did.id()).unwrap().protocol, protocol);
        }
        assert_eq!(router.pending(), 0);
    }

    #[tokio::test]
    async fn test_unregistered_protocol_is_refused() {
        let alice = context(1, HandshakeConfig::default());
        let bob = context(2, HandshakeConfig::default());
        let router = Arc::new(ProtocolRouter::new(bob.clone()));
        assert!(router.unregister(HandshakeProtocol::V1_0));
        assert!(!router.supports(HandshakeProtocol::V1_0.id()));

        let hello = HandshakeMessage::Hello(
            Initiator::new(alice.clone(), HandshakeProtocol::V1_0, None)
                .hello()
                .unwrap(),
        );
        assert!(matches!(
            router.on_request(peer_of(&alice), HandshakeProtocol::V1_0.id(), hello).await,
            Err(HandshakeError::UnsupportedProtocol(_))
        ));

        let wire = Direct {
            router,
            from: peer_of(&alice),
        };
        let (_tx, rx) = watch::channel(false);
        let err = initiate(&wire, alice, HandshakeProtocol::V1_0, peer_of(&bob), rx)
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_claimed_did_must_match_connection_peer() {
        let alice = context(1, HandshakeConfig::default());
        let bob = context(2, HandshakeConfig::default());
        let mallory = context(3, HandshakeConfig::default());
        let router = Arc::new(ProtocolRouter::new(bob.clone()));

        // Mallory's connection, Alice's DID in the hello.
        let hello = HandshakeMessage::Hello(super::super::message::Hello {
            did: alice.identity.did().unwrap().id().to_string(),
            zk_capable: false,
        });
        let err = router
            .on_request(peer_of(&mallory), HandshakeProtocol::V1_1.id(), hello)
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::AuthenticationFailed(_)));
        assert_eq!(router.pending(), 0);
    }

    #[tokio::test]
    async fn test_response_needs_a_parked_hello() {
        let alice = context(1, HandshakeConfig::default());
        let bob = context(2, HandshakeConfig::default());
        let router = Arc::new(ProtocolRouter::new(bob.clone()));

        let mut init = Initiator::new(alice.clone(), HandshakeProtocol::V1_1, None);
        let hello = HandshakeMessage::Hello(init.hello().unwrap());
        let Step::Challenge(challenge) = router
            .on_request(peer_of(&alice), HandshakeProtocol::V1_1.id(), hello)
            .await
            .unwrap()
        else {
            panic!("expected a challenge");
        };
        let response = init.on_challenge(challenge).unwrap();

        // Same response on the other version: no parked responder there.
        let err = router
            .on_request(
                peer_of(&alice),
                HandshakeProtocol::V1_0.id(),
                HandshakeMessage::Response(response.clone()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::ProtocolViolation(_)));

        let step = router
            .on_request(
                peer_of(&alice),
                HandshakeProtocol::V1_1.id(),
                HandshakeMessage::Response(response.clone()),
            )
            .await
            .unwrap();
        assert!(matches!(step, Step::Accepted(a) if a.peer == peer_of(&alice)));

        // The responder is consumed; a second copy finds nothing.
        assert!(router
            .on_request(
                peer_of(&alice),
                HandshakeProtocol::V1_1.id(),
                HandshakeMessage::Response(response),
            )
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_parked_handshake_expires() {
        let config = HandshakeConfig {
            timeout_secs: 5,
            ..HandshakeConfig::default()
        };
        let alice = context(1, config.clone());
        let bob = context(2, config);
        let router = Arc::new(ProtocolRouter::new(bob));

        let mut init = Initiator::new(alice.clone(), HandshakeProtocol::V1_1, None);
        let hello = HandshakeMessage::Hello(init.hello().unwrap());
        let Step::Challenge(challenge) = router
            .on_request(peer_of(&alice), HandshakeProtocol::V1_1.id(), hello)
            .await
            .unwrap()
        else {
            panic!("expected a challenge");
        };
        let response = init.on_challenge(challenge).unwrap();
        assert_eq!(router.pending(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        let err = router
            .on_request(
                peer_of(&alice),
                HandshakeProtocol::V1_1.id(),
                HandshakeMessage::Response(response),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::HandshakeTimeout(_)));
        assert_eq!(router.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_times_out() {
        let config = HandshakeConfig {
            timeout_secs: 5,
            ..HandshakeConfig::default()
        };
        let alice = context(1, config);
        let (_tx, rx) = watch::channel(false);

        let err = initiate(&Silent, alice, HandshakeProtocol::V1_1, PeerId::random(), rx)
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::HandshakeTimeout(d) if d == Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_cancellation_ends_handshake() {
        let alice = context(1, HandshakeConfig::default());
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(true);
        });

        let err = initiate(&Silent, alice, HandshakeProtocol::V1_1, PeerId::random(), rx)
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::Cancelled));
    }
}
