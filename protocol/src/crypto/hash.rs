//! # Hashing Utilities
//!
//! The handful of hashes the trust core actually needs:
//!
//! - **SHA-256** — signing transcripts for the handshake and gossip cards.
//!   Wallets on the other end of a handshake might be hardware signers that
//!   only speak SHA-256 digests, so we keep the transcript format boring.
//!
//! - **BLAKE3** — everything internal: SRS seeding, hash-to-field, MiMC
//!   round constants. Fast and keyed-mode friendly.
//!
//! ## hash_to_field
//!
//! Circuits work over a prime field, but DIDs, nonces and tool results are
//! byte strings. `hash_to_field` hashes with BLAKE3 and reduces the digest
//! modulo the field order. It is generic over the field, so the same input
//! maps to a valid element of BN254's or Pasta's scalar field
//! depending on which backend the prover runs.

use ark_ff::PrimeField;
use sha2::{Digest, Sha256};

/// SHA-256 of the input as a fixed-size array.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// BLAKE3 of the input.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Hash multiple byte slices together without concatenating them first.
pub fn blake3_hash_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// Domain-separated BLAKE3 using `derive_key` mode.
///
/// `domain_separated_hash("a", x)` and `domain_separated_hash("b", x)`
/// never collide: the context string selects a different IV.
pub fn domain_separated_hash(context: &str, data: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Hash arbitrary data to an element of the prime field `F`.
///
/// BLAKE3 the input, interpret the digest as a little-endian integer and
/// reduce modulo the field order. The bias from reducing a 256-bit value
/// into a ~254/255-bit field is negligible.
///
/// ```
/// use ark_bn254::Fr;
/// use lango_p2p::crypto::hash_to_field;
///
/// let a: Fr = hash_to_field(b"did:lango:02ab");
/// let b: Fr = hash_to_field(b"did:lango:02ab");
/// assert_eq!(a, b);
/// ```
pub fn hash_to_field<F: PrimeField>(data: &[u8]) -> F {
    F::from_le_bytes_mod_order(&blake3_hash(data))
}

/// Same as [`hash_to_field`] but with a domain tag mixed in.
pub fn hash_to_field_with_domain<F: PrimeField>(context: &str, data: &[u8]) -> F {
    F::from_le_bytes_mod_order(&domain_separated_hash(context, data))
}
