//! Proof artifacts, backend selection and SRS sources.

use std::fmt;
use std::path::PathBuf;

use ark_ff::PrimeField;
use serde::{Deserialize, Serialize};

use super::field::FieldElement;
use super::mimc;
use super::plonk::ArkFr;
use crate::crypto::hash_to_field;

/// Proving backend. Chosen per service, never per circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofScheme {
    /// Groth16 over BN254. Pairing-based, smallest proofs, needs a
    /// structured reference string per circuit.
    #[default]
    Groth16,
    /// PLONK with an inner-product commitment over the Pasta curves
    /// (halo2). FFT-based and transparent: no reference string at all.
    Plonk,
}

impl ProofScheme {
    /// MiMC hash of `inputs` in this scheme's scalar field.
    pub fn hash(self, inputs: &[FieldElement]) -> FieldElement {
        fn run<F: PrimeField>(inputs: &[FieldElement]) -> FieldElement {
            let elems: Vec<F> = inputs.iter().map(FieldElement::to_field).collect();
            FieldElement::from_field(mimc::hash(&elems))
        }
        match self {
            ProofScheme::Groth16 => run::<ark_bn254::Fr>(inputs),
            ProofScheme::Plonk => run::<ArkFr>(inputs),
        }
    }

    /// Hash arbitrary bytes into this scheme's scalar field.
    pub fn field_from_bytes(self, data: &[u8]) -> FieldElement {
        match self {
            ProofScheme::Groth16 => FieldElement::from_field(hash_to_field::<ark_bn254::Fr>(data)),
            ProofScheme::Plonk => FieldElement::from_field(hash_to_field::<ArkFr>(data)),
        }
    }

    /// Canonical form of `value` in this scheme's field.
    pub fn reduce(self, value: FieldElement) -> FieldElement {
        match self {
            ProofScheme::Groth16 => FieldElement::from_field(value.to_field::<ark_bn254::Fr>()),
            ProofScheme::Plonk => FieldElement::from_field(value.to_field::<ArkFr>()),
        }
    }

    /// Whether setup draws on an [`SrsMode`].
    pub fn needs_srs(self) -> bool {
        matches!(self, ProofScheme::Groth16)
    }
}

impl fmt::Display for ProofScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProofScheme::Groth16 => f.write_str("groth16/bn254"),
            ProofScheme::Plonk => f.write_str("plonk/pasta-ipa"),
        }
    }
}

/// Where circuit-specific setup randomness comes from.
///
/// `Unsafe` draws fresh entropy: fine for a single node in development,
/// useless between nodes because nobody else has the same keys. `File`
/// seeds setup from a shared SRS file so every node that has the file
/// derives identical keys. Only Groth16 reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "path", rename_all = "snake_case")]
pub enum SrsMode {
    #[default]
    Unsafe,
    File(PathBuf),
}

/// A serialized proof plus everything a verifier needs to route it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    /// Compressed Groth16 proof or halo2 transcript, per `scheme`.
    #[serde(with = "crate::encoding::hex_bytes")]
    pub data: Vec<u8>,
    pub public_inputs: Vec<FieldElement>,
    pub circuit_id: String,
    pub scheme: ProofScheme,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_hash_differs_between_fields() {
        let inputs = [FieldElement::from_u64(1), FieldElement::from_u64(2)];
        let bn = ProofScheme::Groth16.hash(&inputs);
        let pasta = ProofScheme::Plonk.hash(&inputs);
        assert_ne!(bn, pasta);
        assert_eq!(bn, ProofScheme::Groth16.hash(&inputs));
    }

    #[test]
    fn test_reduce_is_identity_on_canonical_values() {
        let scheme = ProofScheme::Groth16;
        let h = scheme.field_from_bytes(b"did:lango:abc");
        assert_eq!(scheme.reduce(h), h);
        // All-ones is above the modulus and reduces to something else.
        let big = FieldElement([0xff; 32]);
        assert_ne!(scheme.reduce(big), big);
    }

    #[test]
    fn test_srs_mode_serde() {
        let file = SrsMode::File(PathBuf::from("/etc/lango/srs.bin"));
        let json = serde_json::to_string(&file).unwrap();
        assert_eq!(json, r#"{"mode":"file","path":"/etc/lango/srs.bin"}"#);
        let unsafe_mode: SrsMode = serde_json::from_str(r#"{"mode":"unsafe"}"#).unwrap();
        assert_eq!(unsafe_mode, SrsMode::Unsafe);
    }

    #[test]
    fn test_scheme_serde_names() {
        assert_eq!(serde_json::to_string(&ProofScheme::Plonk).unwrap(), "\"plonk\"");
        assert_eq!(serde_json::to_string(&ProofScheme::Groth16).unwrap(), "\"groth16\"");
        assert!(ProofScheme::Groth16.needs_srs());
        assert!(!ProofScheme::Plonk.needs_srs());
    }
}
