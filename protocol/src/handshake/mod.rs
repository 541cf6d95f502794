//! # Peer Handshake
//!
//! Before two agents trade anything they prove who they are. The
//! responder hands out a random nonce; the initiator answers with a wallet
//! signature over it, or with a zero-knowledge proof of wallet ownership
//! when both sides are set up for that. A good answer earns a session
//! token with a TTL.
//!
//! ```text
//!  Initiator                                   Responder
//!  ─────────                                   ─────────
//!  /lango/handshake/1.x.0 negotiated, peer ID authenticated by libp2p
//!  Hello          ──────────────────────────►  DID derives peer ID? approval
//!                 ◄──────────────────────────  Challenge (signed in 1.1)
//!  verify sig
//!  Response       ──────────────────────────►  replay? nonce? sig / proof?
//!                 ◄──────────────────────────  Ack { token } | Reject
//! ```
//!
//! ## Layout
//!
//! ```text
//! message.rs   — wire types, nonces, signed transcripts
//! machine.rs   — Initiator / Responder state machines, Approver
//! exchange.rs  — request/response driver, timeouts, ProtocolRouter
//! session.rs   — SessionStore
//! nonce.rs     — replay cache + background sweeper
//! security.rs  — failure counting, session invalidation
//! ```

pub mod error;
pub mod exchange;
pub mod machine;
pub mod message;
pub mod nonce;
pub mod security;
pub mod session;

pub use error::HandshakeError;
pub use exchange::{initiate, reject_message, Accepted, HandshakeTransport, ProtocolRouter, Step};
pub use machine::{
    AllowAll, Approver, HandshakeContext, Initiator, InitiatorState, Responder, ResponderState,
};
pub use message::{
    Challenge, ChallengeResponse, HandshakeAck, HandshakeMessage, HandshakeProtocol,
    HandshakeReject, Hello, Nonce, ResponseAuth,
};
pub use nonce::NonceCache;
pub use security::{InvalidationReason, SecurityEventHandler};
pub use session::{Session, SessionStore};
