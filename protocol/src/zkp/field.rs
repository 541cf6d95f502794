//! Curve-independent field elements.
//!
//! The prover runs over BN254 (Groth16) or Pasta (PLONK), whose scalar
//! fields differ.
//! Everything that crosses a module boundary (witnesses, public inputs,
//! gossip credentials) carries a [`FieldElement`]: 32 little-endian bytes
//! that are reduced into whichever field the active backend uses.
//!
//! Values produced by the backend (hash outputs, `from_field`) are always
//! canonical, so they round-trip exactly.

use std::fmt;

use ark_ff::{BigInteger, PrimeField};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A scalar in little-endian byte form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FieldElement(pub [u8; 32]);

impl FieldElement {
    pub const ZERO: FieldElement = FieldElement([0u8; 32]);

    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&value.to_le_bytes());
        Self(bytes)
    }

    /// Reduce into the field `F`.
    pub fn to_field<F: PrimeField>(&self) -> F {
        F::from_le_bytes_mod_order(&self.0)
    }

    /// Canonical encoding of a field element.
    pub fn from_field<F: PrimeField>(value: F) -> Self {
        let le = value.into_bigint().to_bytes_le();
        let mut bytes = [0u8; 32];
        let n = le.len().min(32);
        bytes[..n].copy_from_slice(&le[..n]);
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl From<u64> for FieldElement {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldElement({})", self.to_hex())
    }
}

impl Serialize for FieldElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for FieldElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_vesta::Fr as PastaFr;
    use ark_bn254::Fr as BnFr;
    use ark_ff::UniformRand;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_canonical_values_round_trip_in_both_fields() {
        let mut rng = StdRng::seed_from_u64(42);
        let a = BnFr::rand(&mut rng);
        assert_eq!(FieldElement::from_field(a).to_field::<BnFr>(), a);

        let b = PastaFr::rand(&mut rng);
        assert_eq!(FieldElement::from_field(b).to_field::<PastaFr>(), b);
    }

    #[test]
    fn test_u64_encoding() {
        let fe = FieldElement::from_u64(1_700_000_000);
        assert_eq!(fe.to_field::<BnFr>(), BnFr::from(1_700_000_000u64));
    }

    #[test]
    fn test_json_is_hex_string() {
        let fe = FieldElement::from_u64(255);
        let json = serde_json::to_string(&fe).unwrap();
        assert!(json.starts_with("\"ff00"));
        let back: FieldElement = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fe);
        assert!(serde_json::from_str::<FieldElement>("\"abc\"").is_err());
    }
}
