//! Error types for the handshake.

use std::time::Duration;

use thiserror::Error;

use crate::identity::IdentityError;
use crate::zkp::ProverError;

/// Everything that can end a handshake early.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The whole exchange didn't finish inside the configured timeout.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// The response carried a nonce we've already accepted.
    #[error("replayed nonce")]
    ReplayDetected,

    /// Bad signature, bad proof, wrong nonce, DID/peer mismatch.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The local approver (or lack of one) refused the peer.
    #[error("peer not approved: {0}")]
    ApprovalDenied(String),

    /// The remote side sent us a rejection.
    #[error("rejected by peer: {0}")]
    Rejected(String),

    /// A message arrived that doesn't fit the current state.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Nobody registered a handler for this protocol ID.
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// The request/response transport couldn't deliver a message.
    #[error("transport error: {0}")]
    Transport(String),

    /// The handshake was cancelled locally.
    #[error("handshake cancelled")]
    Cancelled,

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Prover(#[from] ProverError),
}

impl HandshakeError {
    /// Failures that count against the peer's consecutive-failure budget.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            HandshakeError::AuthenticationFailed(_) | HandshakeError::ReplayDetected
        )
    }
}
