//! # Cryptographic Helpers
//!
//! Thin wrappers around audited hash implementations. Signing lives with
//! the wallet in [`crate::identity`]; proof systems live in [`crate::zkp`].
//! Nothing here should ever grow a hand-rolled primitive.

pub mod hash;

pub use hash::{
    blake3_hash, blake3_hash_multi, domain_separated_hash, hash_to_field,
    hash_to_field_with_domain, sha256,
};
