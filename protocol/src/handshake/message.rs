//! # Handshake Wire Messages
//!
//! ```text
//! Initiator → Responder: Hello { did, zk_capable }
//! Responder → Initiator: Challenge { nonce, timestamp, responder_did,
//!                                    zk_required, signature? }
//! Initiator → Responder: Response { did, nonce, auth }
//! Responder → Initiator: Ack { session_token, expires_at, zk_verified }
//!                      | Reject { reason }
//! ```
//!
//! Messages are JSON, tagged by `type`. Both sides sign SHA-256 digests
//! of domain-separated transcripts, never raw message bytes, so field
//! ordering in JSON can't matter.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::config::{HANDSHAKE_PROTOCOL_V1_0, HANDSHAKE_PROTOCOL_V1_1, NONCE_LENGTH};
use crate::crypto::sha256;
use crate::zkp::{FieldElement, Proof};

// ---------------------------------------------------------------------------
// Protocol versions
// ---------------------------------------------------------------------------

/// The two handshake versions we speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandshakeProtocol {
    /// Legacy: challenge signature optional.
    #[serde(rename = "/lango/handshake/1.0.0")]
    V1_0,
    /// Responder must sign the challenge.
    #[serde(rename = "/lango/handshake/1.1.0")]
    V1_1,
}

impl HandshakeProtocol {
    pub fn id(self) -> &'static str {
        match self {
            HandshakeProtocol::V1_0 => HANDSHAKE_PROTOCOL_V1_0,
            HandshakeProtocol::V1_1 => HANDSHAKE_PROTOCOL_V1_1,
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            HANDSHAKE_PROTOCOL_V1_0 => Some(HandshakeProtocol::V1_0),
            HANDSHAKE_PROTOCOL_V1_1 => Some(HandshakeProtocol::V1_1),
            _ => None,
        }
    }

    pub fn requires_signed_challenge(self) -> bool {
        matches!(self, HandshakeProtocol::V1_1)
    }
}

impl fmt::Display for HandshakeProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

// ---------------------------------------------------------------------------
// Nonce
// ---------------------------------------------------------------------------

/// 32 random bytes, hex on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nonce(pub [u8; NONCE_LENGTH]);

impl Nonce {
    pub fn random() -> Self {
        let mut bytes = [0u8; NONCE_LENGTH];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", hex::encode(&self.0[..8]))
    }
}

impl Serialize for Nonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Nonce {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let mut bytes = [0u8; NONCE_LENGTH];
        hex::decode_to_slice(&s, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(Self(bytes))
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    pub did: String,
    /// The initiator can produce wallet-ownership proofs.
    pub zk_capable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub nonce: Nonce,
    /// Unix milliseconds when the challenge was issued.
    pub timestamp: u64,
    pub responder_did: String,
    /// The initiator must answer with a wallet-ownership proof.
    pub zk_required: bool,
    /// Responder's signature over [`challenge_transcript`].
    #[serde(default, with = "crate::encoding::hex_bytes_opt")]
    pub signature: Option<Vec<u8>>,
}

/// How the initiator proves it holds its wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ResponseAuth {
    /// Wallet signature over [`response_transcript`].
    Signature {
        #[serde(with = "crate::encoding::hex_bytes")]
        signature: Vec<u8>,
    },
    /// Wallet-ownership proof over the challenge nonce, bound to the
    /// claimed DID by a signature over [`zk_binding_transcript`].
    ZkProof {
        proof: Proof,
        public_key_hash: FieldElement,
        #[serde(with = "crate::encoding::hex_bytes")]
        signature: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeResponse {
    pub did: String,
    pub nonce: Nonce,
    pub auth: ResponseAuth,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeAck {
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
    pub zk_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeReject {
    pub reason: String,
}

/// Every handshake request and reply, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandshakeMessage {
    Hello(Hello),
    Challenge(Challenge),
    Response(ChallengeResponse),
    Ack(HandshakeAck),
    Reject(HandshakeReject),
}

impl HandshakeMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            HandshakeMessage::Hello(_) => "hello",
            HandshakeMessage::Challenge(_) => "challenge",
            HandshakeMessage::Response(_) => "response",
            HandshakeMessage::Ack(_) => "ack",
            HandshakeMessage::Reject(_) => "reject",
        }
    }
}

// ---------------------------------------------------------------------------
// Transcripts
// ---------------------------------------------------------------------------

fn transcript(domain: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut buf = Vec::with_capacity(256);
    buf.extend_from_slice(domain);
    for part in parts {
        buf.extend_from_slice(&(part.len() as u32).to_be_bytes());
        buf.extend_from_slice(part);
    }
    sha256(&buf)
}

/// What the responder signs when issuing a challenge.
pub fn challenge_transcript(
    protocol: HandshakeProtocol,
    nonce: &Nonce,
    timestamp: u64,
    responder_did: &str,
    initiator_did: &str,
    zk_required: bool,
) -> [u8; 32] {
    transcript(
        b"lango/handshake/challenge",
        &[
            protocol.id().as_bytes(),
            nonce.as_bytes(),
            &timestamp.to_be_bytes(),
            responder_did.as_bytes(),
            initiator_did.as_bytes(),
            &[zk_required as u8],
        ],
    )
}

/// What the initiator signs when answering a challenge.
pub fn response_transcript(nonce: &Nonce, responder_did: &str, initiator_did: &str) -> [u8; 32] {
    transcript(
        b"lango/handshake/response",
        &[
            nonce.as_bytes(),
            responder_did.as_bytes(),
            initiator_did.as_bytes(),
        ],
    )
}

/// What the initiator signs next to a wallet-ownership proof. Covers the
/// proof bytes and its public key hash, so a proof is only accepted from
/// the holder of the claimed DID's key.
pub fn zk_binding_transcript(
    nonce: &Nonce,
    responder_did: &str,
    initiator_did: &str,
    public_key_hash: &FieldElement,
    proof: &Proof,
) -> [u8; 32] {
    transcript(
        b"lango/handshake/zk-binding",
        &[
            nonce.as_bytes(),
            responder_did.as_bytes(),
            initiator_did.as_bytes(),
            &public_key_hash.0,
            &sha256(&proof.data),
        ],
    )
}
