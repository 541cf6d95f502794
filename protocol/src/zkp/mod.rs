//! # Zero-Knowledge Proof Module
//!
//! Agents prove things about themselves without handing over the secrets
//! behind them: that they control a wallet, that a response really came
//! from them inside a time window, that they hold at least some balance,
//! that they passed a capability test with a good enough score.
//!
//! ## Architecture
//!
//! ```text
//! field.rs    — FieldElement: curve-independent 32-byte scalars
//! mimc.rs     — MiMC hash, native + R1CS gadget
//! circuit.rs  — the four statements as ConstraintSynthesizers
//! witness.rs  — typed assignments, public-input ordering
//! proof.rs    — Proof, ProofScheme (Groth16 / PLONK), SrsMode
//! plonk.rs    — R1CS → PLONKish layout, halo2 IPA keys
//! prover.rs   — ProverService: compile, prove, verify
//! ```
//!
//! ## Security Model
//!
//! - **Soundness**: Groth16 knowledge-soundness in the generic group model;
//!   PLONK over halo2's inner-product argument under discrete log.
//! - **Range checks**: 64-bit boolean decomposition; no wrap-around.
//! - **Setup**: Groth16 is per-circuit and `SrsMode::Unsafe` is for
//!   development only; Groth16 nodes that verify each other's proofs must
//!   share an SRS file. PLONK setup is transparent and needs nothing.

pub mod circuit;
pub mod field;
pub mod mimc;
pub mod plonk;
pub mod proof;
pub mod prover;
pub mod witness;

pub use field::FieldElement;
pub use proof::{Proof, ProofScheme, SrsMode};
pub use prover::{CircuitInfo, ProverError, ProverService};
pub use witness::{CircuitKind, Witness};

/// Bits used for range proofs. Everything we range-check is a u64.
pub const RANGE_BITS: usize = 64;

/// Well-known circuit IDs.
pub const WALLET_OWNERSHIP_CIRCUIT: &str = "wallet_ownership";
pub const RESPONSE_ATTESTATION_CIRCUIT: &str = "response_attestation";
pub const BALANCE_RANGE_CIRCUIT: &str = "balance_range";
pub const AGENT_CAPABILITY_CIRCUIT: &str = "agent_capability";
