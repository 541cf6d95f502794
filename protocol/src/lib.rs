// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Lango P2P — Trust Core
//!
//! Everything an agent needs before it lets a stranger call its tools:
//! a wallet-derived identity, a mutual handshake that ends in a session
//! token, a firewall in front of the tools, a reputation ledger that
//! remembers how every peer behaved, and a gossip directory to find peers
//! in the first place.
//!
//! ```text
//!   GossipCard ──► discovery ──► PeerDirectory
//!                                     │ dial
//!                                     ▼
//!   wallet ─► Did ─► handshake (sig or ZK) ─► Session token
//!                                     │
//!                                     ▼
//!   ToolRequest ─► capability gateway ─► firewall ─► executor
//!                         │                 ▲
//!                         └─► reputation ───┘
//! ```
//!
//! ## Modules
//!
//! - **identity** — `did:lango:` identifiers bound to a wallet key.
//! - **zkp** — Groth16 circuits over BN254 and BLS12-381 with MiMC hashing.
//! - **handshake** — challenge/response protocol, sessions, replay cache.
//! - **firewall** — ACL, owner data shield, rate limits, response attestation.
//! - **reputation** — per-peer trust scores persisted in sled.
//! - **discovery** — signed gossip cards and the peer directory.
//! - **capability** — the tool-call gateway and pricing.
//! - **crypto** — hashing helpers shared by the rest.
//! - **config** — protocol constants and tunables.

pub mod capability;
pub mod config;
pub mod crypto;
pub mod discovery;
pub mod encoding;
pub mod firewall;
pub mod handshake;
pub mod identity;
pub mod reputation;
pub mod zkp;
