//! # Handshake State Machines
//!
//! Transport-free halves of the handshake. The exchange layer feeds them
//! decoded messages and sends back whatever they return.
//!
//! ```text
//! Responder:  Init ──hello──► ChallengeIssued ──response──► ResponseReceived
//!                                                              │
//!                                              verified? ──────┤
//!                                                 │            │ no
//!                                                 ▼            ▼
//!                                   Verified ──► SessionEstablished   Failed
//!
//! Initiator:  Init ──hello──► AwaitingChallenge ──response──► AwaitingResult
//!                                                                │
//!                                                     ack ◄──────┴──────► reject
//!                                                      ▼                    ▼
//!                                             SessionEstablished          Failed
//! ```
//!
//! Any error moves a machine to `Failed` and it stays there.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libp2p::PeerId;
use tracing::{debug, info, info_span, warn, Span};

use super::error::HandshakeError;
use super::message::{
    challenge_transcript, response_transcript, zk_binding_transcript, Challenge, ChallengeResponse, HandshakeAck,
    HandshakeMessage, HandshakeProtocol, Hello, Nonce, ResponseAuth,
};
use super::nonce::NonceCache;
use super::security::SecurityEventHandler;
use super::session::{Session, SessionStore};
use crate::config::{HandshakeConfig, DEFAULT_MIN_TRUST_SCORE};
use crate::identity::{did_from_string, verify_did, Did, IdentityProvider};
use crate::zkp::{ProverService, Witness, WALLET_OWNERSHIP_CIRCUIT};

/// Domain tag the initiator signs to derive its private ownership response.
const ZK_RESPONSE_DOMAIN: &[u8] = b"lango/handshake/zk-response";

// ---------------------------------------------------------------------------
// Approval
// ---------------------------------------------------------------------------

/// Asks someone (usually the human owner) whether a new peer may connect.
#[async_trait]
pub trait Approver: Send + Sync {
    async fn approve(&self, peer_did: &str) -> bool;
}

/// Approves everyone. Handy for tests and closed networks.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl Approver for AllowAll {
    async fn approve(&self, _peer_did: &str) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Shared context
// ---------------------------------------------------------------------------

/// Everything both roles need, shared by every handshake a node runs.
pub struct HandshakeContext {
    pub identity: Arc<IdentityProvider>,
    pub sessions: Arc<SessionStore>,
    pub nonces: Arc<NonceCache>,
    pub security: Arc<SecurityEventHandler>,
    pub prover: Option<Arc<ProverService>>,
    pub approver: Option<Arc<dyn Approver>>,
    pub config: HandshakeConfig,
    pub span: Span,
}

impl HandshakeContext {
    /// Fresh session store, nonce cache and security handler built from
    /// `config`.
    pub fn new(identity: Arc<IdentityProvider>, config: HandshakeConfig) -> Self {
        let sessions = Arc::new(SessionStore::new(config.session_ttl()));
        let nonces = Arc::new(NonceCache::new(config.nonce_ttl()));
        let security = Arc::new(SecurityEventHandler::new(
            Arc::clone(&sessions),
            config.max_auth_failures,
            DEFAULT_MIN_TRUST_SCORE,
        ));
        Self {
            identity,
            sessions,
            nonces,
            security,
            prover: None,
            approver: None,
            config,
            span: info_span!("handshake"),
        }
    }

    pub fn with_prover(mut self, prover: Arc<ProverService>) -> Self {
        self.prover = Some(prover);
        self
    }

    pub fn with_approver(mut self, approver: Arc<dyn Approver>) -> Self {
        self.approver = Some(approver);
        self
    }

    pub fn with_security(mut self, security: Arc<SecurityEventHandler>) -> Self {
        self.security = security;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// We can answer a ZK challenge (and ask for one).
    pub fn zk_capable(&self) -> bool {
        self.prover
            .as_ref()
            .map(|p| p.is_compiled(WALLET_OWNERSHIP_CIRCUIT))
            .unwrap_or(false)
    }

    /// Protocol this node dials with.
    pub fn preferred_protocol(&self) -> HandshakeProtocol {
        if self.config.require_signed_challenge {
            HandshakeProtocol::V1_1
        } else {
            HandshakeProtocol::V1_0
        }
    }
}

impl std::fmt::Debug for HandshakeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeContext")
            .field("sessions", &self.sessions)
            .field("nonces", &self.nonces)
            .field("zk_capable", &self.zk_capable())
            .field("approver", &self.approver.is_some())
            .finish()
    }
}

fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

fn auth_failed(reason: impl Into<String>) -> HandshakeError {
    HandshakeError::AuthenticationFailed(reason.into())
}

// ---------------------------------------------------------------------------
// Responder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderState {
    Init,
    ChallengeIssued,
    ResponseReceived,
    Verified,
    SessionEstablished,
    Failed,
}

/// The side that answers the hello.
pub struct Responder {
    ctx: Arc<HandshakeContext>,
    protocol: HandshakeProtocol,
    remote_peer: Option<PeerId>,
    state: ResponderState,
    initiator: Option<Did>,
    issued: Option<Challenge>,
}

impl Responder {
    /// `remote_peer` is the transport-level peer ID when the transport
    /// authenticates one; the claimed DID must derive it.
    pub fn new(ctx: Arc<HandshakeContext>, protocol: HandshakeProtocol, remote_peer: Option<PeerId>) -> Self {
        Self {
            ctx,
            protocol,
            remote_peer,
            state: ResponderState::Init,
            initiator: None,
            issued: None,
        }
    }

    pub fn state(&self) -> ResponderState {
        self.state
    }

    pub fn protocol(&self) -> HandshakeProtocol {
        self.protocol
    }

    /// DID of the initiator, once the hello has been accepted.
    pub fn initiator_did(&self) -> Option<&str> {
        self.initiator.as_ref().map(Did::id)
    }

    /// Accept a hello and issue a challenge.
    pub async fn on_hello(&mut self, hello: Hello) -> Result<Challenge, HandshakeError> {
        let result = self.issue_challenge(hello).await;
        match &result {
            Ok(_) => self.state = ResponderState::ChallengeIssued,
            Err(e) => {
                self.state = ResponderState::Failed;
                warn!(parent: &self.ctx.span, protocol = %self.protocol, error = %e, "hello rejected");
            }
        }
        result
    }

    async fn issue_challenge(&mut self, hello: Hello) -> Result<Challenge, HandshakeError> {
        if self.state != ResponderState::Init {
            return Err(HandshakeError::ProtocolViolation(format!(
                "hello in state {:?}",
                self.state
            )));
        }

        let initiator = did_from_string(&hello.did)?;
        if let Some(peer) = &self.remote_peer {
            verify_did(&initiator, peer).map_err(|e| auth_failed(e.to_string()))?;
        }

        self.check_approval(initiator.id()).await?;

        let zk_required = self.ctx.config.zk_enabled && hello.zk_capable && self.ctx.zk_capable();
        let local = self.ctx.identity.did()?;
        let nonce = Nonce::random();
        let timestamp = now_millis();

        let signature = if self.protocol.requires_signed_challenge()
            || self.ctx.config.require_signed_challenge
        {
            let digest = challenge_transcript(
                self.protocol,
                &nonce,
                timestamp,
                local.id(),
                initiator.id(),
                zk_required,
            );
            Some(self.ctx.identity.sign(&digest)?)
        } else {
            None
        };

        let challenge = Challenge {
            nonce,
            timestamp,
            responder_did: local.id().to_string(),
            zk_required,
            signature,
        };
        debug!(
            parent: &self.ctx.span,
            peer = initiator.id(),
            protocol = %self.protocol,
            zk_required,
            "challenge issued"
        );
        self.initiator = Some(initiator);
        self.issued = Some(challenge.clone());
        Ok(challenge)
    }

    async fn check_approval(&self, peer_did: &str) -> Result<(), HandshakeError> {
        let config = &self.ctx.config;
        if !config.require_approval {
            return Ok(());
        }
        if config.auto_approve_known_peers && self.ctx.sessions.has_live_session(peer_did) {
            debug!(parent: &self.ctx.span, peer = peer_did, "known peer, approval skipped");
            return Ok(());
        }
        match &self.ctx.approver {
            None => Err(HandshakeError::ApprovalDenied(
                "approval required but no approver configured".into(),
            )),
            Some(approver) => {
                if approver.approve(peer_did).await {
                    Ok(())
                } else {
                    Err(HandshakeError::ApprovalDenied("denied by approver".into()))
                }
            }
        }
    }

    /// Check the initiator's answer. On success the session is already in
    /// the store when this returns.
    pub fn on_response(&mut self, response: ChallengeResponse) -> Result<HandshakeAck, HandshakeError> {
        let result = self.verify_response(response);
        match &result {
            Ok(ack) => {
                self.state = ResponderState::SessionEstablished;
                info!(
                    parent: &self.ctx.span,
                    peer = self.initiator_did().unwrap_or_default(),
                    protocol = %self.protocol,
                    zk_verified = ack.zk_verified,
                    "session established"
                );
            }
            Err(e) => {
                self.state = ResponderState::Failed;
                if let Some(peer) = self.initiator.as_ref().map(|d| d.id().to_string()) {
                    // Only a DID bound to the transport peer is counted.
                    if e.is_auth_failure() && self.remote_peer.is_some() {
                        self.ctx.security.record_auth_failure(&peer);
                    }
                    warn!(parent: &self.ctx.span, peer = %peer, error = %e, "handshake failed");
                }
            }
        }
        result
    }

    fn verify_response(&mut self, response: ChallengeResponse) -> Result<HandshakeAck, HandshakeError> {
        if self.state != ResponderState::ChallengeIssued {
            return Err(HandshakeError::ProtocolViolation(format!(
                "response in state {:?}",
                self.state
            )));
        }
        self.state = ResponderState::ResponseReceived;

        let (initiator, issued) = match (&self.initiator, &self.issued) {
            (Some(i), Some(c)) => (i.clone(), c.clone()),
            _ => return Err(HandshakeError::ProtocolViolation("no challenge on record".into())),
        };
        if response.did != initiator.id() {
            return Err(auth_failed("DID changed mid-handshake"));
        }
        if !self.ctx.nonces.check_and_insert(&response.nonce) {
            return Err(HandshakeError::ReplayDetected);
        }
        if response.nonce != issued.nonce {
            return Err(auth_failed("nonce does not match the issued challenge"));
        }

        let zk_verified = match &response.auth {
            ResponseAuth::Signature { signature } => {
                if issued.zk_required {
                    return Err(auth_failed("wallet-ownership proof required"));
                }
                let digest = response_transcript(&issued.nonce, &issued.responder_did, initiator.id());
                if !initiator.verify(&digest, signature) {
                    return Err(auth_failed("invalid response signature"));
                }
                false
            }
            ResponseAuth::ZkProof {
                proof,
                public_key_hash,
                signature,
            } => {
                let digest = zk_binding_transcript(
                    &issued.nonce,
                    &issued.responder_did,
                    initiator.id(),
                    public_key_hash,
                    proof,
                );
                if !initiator.verify(&digest, signature) {
                    return Err(auth_failed("proof not bound to the claimed DID"));
                }
                let prover = self
                    .ctx
                    .prover
                    .as_ref()
                    .ok_or_else(|| auth_failed("proof offered but no verifier available"))?;
                if proof.circuit_id != WALLET_OWNERSHIP_CIRCUIT {
                    return Err(auth_failed(format!("unexpected circuit {}", proof.circuit_id)));
                }
                let challenge = prover.field_from_bytes(issued.nonce.as_bytes());
                let valid = prover
                    .verify(proof, &[challenge, *public_key_hash])
                    .map_err(|e| auth_failed(e.to_string()))?;
                if !valid {
                    return Err(auth_failed("invalid wallet-ownership proof"));
                }
                true
            }
        };

        self.state = ResponderState::Verified;
        let session = self
            .ctx
            .sessions
            .create(initiator.id(), zk_verified, self.protocol);
        self.ctx.security.record_auth_success(initiator.id());

        Ok(HandshakeAck {
            session_token: session.token,
            expires_at: session.expires_at,
            zk_verified,
        })
    }
}

// ---------------------------------------------------------------------------
// Initiator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiatorState {
    Init,
    AwaitingChallenge,
    AwaitingResult,
    SessionEstablished,
    Failed,
}

/// The side that sent the hello.
pub struct Initiator {
    ctx: Arc<HandshakeContext>,
    protocol: HandshakeProtocol,
    expected_responder: Option<PeerId>,
    state: InitiatorState,
    local: Option<Did>,
    responder_did: Option<String>,
}

impl Initiator {
    /// `expected_responder` is the peer we think we dialed; the challenge's
    /// DID must derive it.
    pub fn new(
        ctx: Arc<HandshakeContext>,
        protocol: HandshakeProtocol,
        expected_responder: Option<PeerId>,
    ) -> Self {
        Self {
            ctx,
            protocol,
            expected_responder,
            state: InitiatorState::Init,
            local: None,
            responder_did: None,
        }
    }

    pub fn state(&self) -> InitiatorState {
        self.state
    }

    pub fn protocol(&self) -> HandshakeProtocol {
        self.protocol
    }

    pub fn hello(&mut self) -> Result<Hello, HandshakeError> {
        if self.state != InitiatorState::Init {
            self.state = InitiatorState::Failed;
            return Err(HandshakeError::ProtocolViolation("hello already sent".into()));
        }
        let local = match self.ctx.identity.did() {
            Ok(did) => did,
            Err(e) => {
                self.state = InitiatorState::Failed;
                return Err(e.into());
            }
        };
        let hello = Hello {
            did: local.id().to_string(),
            zk_capable: self.ctx.zk_capable(),
        };
        self.local = Some(local);
        self.state = InitiatorState::AwaitingChallenge;
        Ok(hello)
    }

    /// Check the responder's challenge and produce our answer.
    ///
    /// Proof generation is synchronous and can take a while on slow
    /// machines.
    pub fn on_challenge(&mut self, challenge: Challenge) -> Result<ChallengeResponse, HandshakeError> {
        let result = self.answer(challenge);
        match &result {
            Ok(_) => self.state = InitiatorState::AwaitingResult,
            Err(e) => {
                self.state = InitiatorState::Failed;
                warn!(parent: &self.ctx.span, protocol = %self.protocol, error = %e, "challenge rejected");
            }
        }
        result
    }

    fn answer(&mut self, challenge: Challenge) -> Result<ChallengeResponse, HandshakeError> {
        if self.state != InitiatorState::AwaitingChallenge {
            return Err(HandshakeError::ProtocolViolation(format!(
                "challenge in state {:?}",
                self.state
            )));
        }
        let local = self
            .local
            .clone()
            .ok_or_else(|| HandshakeError::ProtocolViolation("no hello sent".into()))?;

        let responder = did_from_string(&challenge.responder_did)?;
        if let Some(peer) = &self.expected_responder {
            verify_did(&responder, peer).map_err(|e| auth_failed(e.to_string()))?;
        }

        let max_skew = self.ctx.config.timeout().as_millis() as u64;
        if now_millis().abs_diff(challenge.timestamp) > max_skew {
            return Err(auth_failed("stale challenge"));
        }

        match &challenge.signature {
            None if self.protocol.requires_signed_challenge() => {
                return Err(auth_failed("unsigned challenge"));
            }
            None => {}
            Some(signature) => {
                let digest = challenge_transcript(
                    self.protocol,
                    &challenge.nonce,
                    challenge.timestamp,
                    responder.id(),
                    local.id(),
                    challenge.zk_required,
                );
                if !responder.verify(&digest, signature) {
                    return Err(auth_failed("invalid challenge signature"));
                }
            }
        }

        let auth = if challenge.zk_required {
            self.prove_ownership(&challenge.nonce, responder.id(), local.id())?
        } else {
            let digest = response_transcript(&challenge.nonce, responder.id(), local.id());
            ResponseAuth::Signature {
                signature: self.ctx.identity.sign(&digest)?,
            }
        };

        self.responder_did = Some(responder.id().to_string());
        Ok(ChallengeResponse {
            did: local.id().to_string(),
            nonce: challenge.nonce,
            auth,
        })
    }

    fn prove_ownership(
        &self,
        nonce: &Nonce,
        responder_did: &str,
        local_did: &str,
    ) -> Result<ResponseAuth, HandshakeError> {
        let prover = self
            .ctx
            .prover
            .as_ref()
            .filter(|p| p.is_compiled(WALLET_OWNERSHIP_CIRCUIT))
            .ok_or_else(|| {
                HandshakeError::ProtocolViolation("proof required but no prover available".into())
            })?;

        let mut message = ZK_RESPONSE_DOMAIN.to_vec();
        message.extend_from_slice(nonce.as_bytes());
        let response = prover.field_from_bytes(&self.ctx.identity.sign(&message)?);
        let challenge = prover.field_from_bytes(nonce.as_bytes());
        let public_key_hash = prover.mimc_hash(&[response, challenge]);

        let proof = prover.prove(
            WALLET_OWNERSHIP_CIRCUIT,
            &Witness::WalletOwnership {
                response,
                challenge,
                public_key_hash,
            },
        )?;
        let binding =
            zk_binding_transcript(nonce, responder_did, local_did, &public_key_hash, &proof);
        Ok(ResponseAuth::ZkProof {
            signature: self.ctx.identity.sign(&binding)?,
            proof,
            public_key_hash,
        })
    }

    /// Consume the responder's verdict.
    pub fn on_result(&mut self, message: HandshakeMessage) -> Result<Session, HandshakeError> {
        if self.state != InitiatorState::AwaitingResult {
            self.state = InitiatorState::Failed;
            return Err(HandshakeError::ProtocolViolation(format!(
                "{} in state {:?}",
                message.kind(),
                self.state
            )));
        }
        match message {
            HandshakeMessage::Ack(ack) => {
                let peer_did = self.responder_did.clone().unwrap_or_default();
                self.state = InitiatorState::SessionEstablished;
                info!(
                    parent: &self.ctx.span,
                    peer = %peer_did,
                    protocol = %self.protocol,
                    zk_verified = ack.zk_verified,
                    "handshake accepted"
                );
                Ok(Session {
                    peer_did,
                    token: ack.session_token,
                    zk_verified: ack.zk_verified,
                    protocol: self.protocol,
                    created_at: Utc::now(),
                    expires_at: ack.expires_at,
                })
            }
            HandshakeMessage::Reject(reject) => {
                self.state = InitiatorState::Failed;
                Err(HandshakeError::Rejected(reject.reason))
            }
            other => {
                self.state = InitiatorState::Failed;
                Err(HandshakeError::ProtocolViolation(format!(
                    "unexpected {} message",
                    other.kind()
                )))
            }
        }
    }
}
