//! # Proof Circuits
//!
//! Four fixed R1CS statements, all generic over the scalar field so the
//! same definitions compile for BN254 and the Pasta field.
//!
//! | circuit | private | public | statement |
//! |---------|---------|--------|-----------|
//! | [`WalletOwnershipCircuit`] | response | challenge, public_key_hash | `H(response, challenge) == public_key_hash` |
//! | [`ResponseAttestationCircuit`] | agent_key_proof, source_data_hash | agent_did_hash, response_hash, timestamp, min_ts, max_ts | key binding, response binding, `min_ts <= ts <= max_ts` |
//! | [`BalanceRangeCircuit`] | balance | threshold | `balance >= threshold` |
//! | [`AgentCapabilityCircuit`] | actual_score, test_hash | min_score, agent_did_hash, capability_hash, agent_test_binding | score floor, capability and test bindings |
//!
//! Public inputs are allocated in the order listed; [`crate::zkp::Witness::public_inputs`]
//! must produce them in exactly the same order.
//!
//! ## Range checks
//!
//! `a >= b` is enforced by decomposing `a - b` into [`RANGE_BITS`] boolean
//! witnesses and recomposing. A negative difference wraps around the field
//! and has no 64-bit decomposition, so the system is unsatisfiable.
//!
//! All witness slots are `Option` so a blank circuit can be synthesized for
//! key generation.

use ark_ff::{BigInteger, PrimeField};
use ark_r1cs_std::{
    alloc::AllocVar,
    boolean::Boolean,
    eq::EqGadget,
    fields::{fp::FpVar, FieldVar},
    R1CSVar,
};
use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystemRef, SynthesisError};

use super::mimc::hash_gadget;
use super::RANGE_BITS;

// ---------------------------------------------------------------------------
// Allocation helpers
// ---------------------------------------------------------------------------

fn input<F: PrimeField>(
    cs: &ConstraintSystemRef<F>,
    value: Option<F>,
) -> Result<FpVar<F>, SynthesisError> {
    FpVar::new_input(ark_relations::ns!(cs, "input"), || {
        value.ok_or(SynthesisError::AssignmentMissing)
    })
}

fn witness<F: PrimeField>(
    cs: &ConstraintSystemRef<F>,
    value: Option<F>,
) -> Result<FpVar<F>, SynthesisError> {
    FpVar::new_witness(ark_relations::ns!(cs, "witness"), || {
        value.ok_or(SynthesisError::AssignmentMissing)
    })
}

/// Enforce `a >= b` for values that fit in 64 bits.
pub fn enforce_geq<F: PrimeField>(
    cs: &ConstraintSystemRef<F>,
    a: &FpVar<F>,
    b: &FpVar<F>,
) -> Result<(), SynthesisError> {
    let delta = a - b;

    // During setup there is no assignment; `value()` errors and the bit
    // closures are never evaluated.
    let bits: Option<Vec<bool>> = delta.value().ok().map(|d| {
        let bigint = d.into_bigint();
        (0..RANGE_BITS).map(|i| bigint.get_bit(i)).collect()
    });

    let mut reconstructed = FpVar::<F>::zero();
    let mut power_of_two = FpVar::<F>::one();
    let two = FpVar::<F>::constant(F::from(2u64));

    for i in 0..RANGE_BITS {
        let bit = Boolean::<F>::new_witness(ark_relations::ns!(cs, "delta_bit"), || {
            bits.as_ref()
                .map(|b| b[i])
                .ok_or(SynthesisError::AssignmentMissing)
        })?;
        reconstructed += FpVar::<F>::from(bit) * &power_of_two;
        power_of_two *= &two;
    }

    reconstructed.enforce_equal(&delta)
}

// ---------------------------------------------------------------------------
// Wallet ownership
// ---------------------------------------------------------------------------

/// Knowledge of a response that hashes with the challenge to a public key hash.
#[derive(Clone, Default)]
pub struct WalletOwnershipCircuit<F: PrimeField> {
    pub response: Option<F>,
    pub challenge: Option<F>,
    pub public_key_hash: Option<F>,
}

impl<F: PrimeField> ConstraintSynthesizer<F> for WalletOwnershipCircuit<F> {
    fn generate_constraints(self, cs: ConstraintSystemRef<F>) -> Result<(), SynthesisError> {
        let challenge = input(&cs, self.challenge)?;
        let public_key_hash = input(&cs, self.public_key_hash)?;
        let response = witness(&cs, self.response)?;

        let computed = hash_gadget(&[response, challenge])?;
        computed.enforce_equal(&public_key_hash)
    }
}

// ---------------------------------------------------------------------------
// Response attestation
// ---------------------------------------------------------------------------

/// Binds a response hash to an agent key and a timestamp inside a window.
#[derive(Clone, Default)]
pub struct ResponseAttestationCircuit<F: PrimeField> {
    pub agent_key_proof: Option<F>,
    pub source_data_hash: Option<F>,
    pub agent_did_hash: Option<F>,
    pub response_hash: Option<F>,
    pub timestamp: Option<F>,
    pub min_timestamp: Option<F>,
    pub max_timestamp: Option<F>,
}

impl<F: PrimeField> ConstraintSynthesizer<F> for ResponseAttestationCircuit<F> {
    fn generate_constraints(self, cs: ConstraintSystemRef<F>) -> Result<(), SynthesisError> {
        let agent_did_hash = input(&cs, self.agent_did_hash)?;
        let response_hash = input(&cs, self.response_hash)?;
        let timestamp = input(&cs, self.timestamp)?;
        let min_timestamp = input(&cs, self.min_timestamp)?;
        let max_timestamp = input(&cs, self.max_timestamp)?;

        let agent_key_proof = witness(&cs, self.agent_key_proof)?;
        let source_data_hash = witness(&cs, self.source_data_hash)?;

        hash_gadget(&[agent_key_proof.clone()])?.enforce_equal(&agent_did_hash)?;
        hash_gadget(&[source_data_hash, agent_key_proof, timestamp.clone()])?
            .enforce_equal(&response_hash)?;

        enforce_geq(&cs, &timestamp, &min_timestamp)?;
        enforce_geq(&cs, &max_timestamp, &timestamp)
    }
}

// ---------------------------------------------------------------------------
// Balance range
// ---------------------------------------------------------------------------

/// Private balance at or above a public threshold.
#[derive(Clone, Default)]
pub struct BalanceRangeCircuit<F: PrimeField> {
    pub balance: Option<F>,
    pub threshold: Option<F>,
}

impl<F: PrimeField> ConstraintSynthesizer<F> for BalanceRangeCircuit<F> {
    fn generate_constraints(self, cs: ConstraintSystemRef<F>) -> Result<(), SynthesisError> {
        let threshold = input(&cs, self.threshold)?;
        let balance = witness(&cs, self.balance)?;
        enforce_geq(&cs, &balance, &threshold)
    }
}

// ---------------------------------------------------------------------------
// Agent capability
// ---------------------------------------------------------------------------

/// A capability test passed with a minimum score, bound to the agent's DID.
#[derive(Clone, Default)]
pub struct AgentCapabilityCircuit<F: PrimeField> {
    pub actual_score: Option<F>,
    pub test_hash: Option<F>,
    pub min_score: Option<F>,
    pub agent_did_hash: Option<F>,
    pub capability_hash: Option<F>,
    pub agent_test_binding: Option<F>,
}

impl<F: PrimeField> ConstraintSynthesizer<F> for AgentCapabilityCircuit<F> {
    fn generate_constraints(self, cs: ConstraintSystemRef<F>) -> Result<(), SynthesisError> {
        let min_score = input(&cs, self.min_score)?;
        let agent_did_hash = input(&cs, self.agent_did_hash)?;
        let capability_hash = input(&cs, self.capability_hash)?;
        let agent_test_binding = input(&cs, self.agent_test_binding)?;

        let actual_score = witness(&cs, self.actual_score)?;
        let test_hash = witness(&cs, self.test_hash)?;

        enforce_geq(&cs, &actual_score, &min_score)?;
        hash_gadget(&[test_hash.clone(), actual_score])?.enforce_equal(&capability_hash)?;
        hash_gadget(&[test_hash, agent_did_hash])?.enforce_equal(&agent_test_binding)
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Any of the four circuits, so the prover can treat them uniformly.
#[derive(Clone)]
pub enum AnyCircuit<F: PrimeField> {
    WalletOwnership(WalletOwnershipCircuit<F>),
    ResponseAttestation(ResponseAttestationCircuit<F>),
    BalanceRange(BalanceRangeCircuit<F>),
    AgentCapability(AgentCapabilityCircuit<F>),
}

impl<F: PrimeField> ConstraintSynthesizer<F> for AnyCircuit<F> {
    fn generate_constraints(self, cs: ConstraintSystemRef<F>) -> Result<(), SynthesisError> {
        match self {
            AnyCircuit::WalletOwnership(c) => c.generate_constraints(cs),
            AnyCircuit::ResponseAttestation(c) => c.generate_constraints(cs),
            AnyCircuit::BalanceRange(c) => c.generate_constraints(cs),
            AnyCircuit::AgentCapability(c) => c.generate_constraints(cs),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zkp::mimc::hash;
    use ark_bn254::Fr;
    use ark_relations::r1cs::ConstraintSystem;

    fn satisfied<C: ConstraintSynthesizer<Fr>>(circuit: C) -> bool {
        let cs = ConstraintSystem::<Fr>::new_ref();
        circuit.generate_constraints(cs.clone()).unwrap();
        cs.is_satisfied().unwrap()
    }

    fn f(x: u64) -> Fr {
        Fr::from(x)
    }

    #[test]
    fn ownership_accepts_correct_response_and_rejects_wrong_one() {
        let response = f(424242);
        let challenge = f(7);
        let pk_hash = hash(&[response, challenge]);

        assert!(satisfied(WalletOwnershipCircuit {
            response: Some(response),
            challenge: Some(challenge),
            public_key_hash: Some(pk_hash),
        }));
        assert!(!satisfied(WalletOwnershipCircuit {
            response: Some(f(1)),
            challenge: Some(challenge),
            public_key_hash: Some(pk_hash),
        }));
    }

    fn attestation(ts: u64, min: u64, max: u64) -> ResponseAttestationCircuit<Fr> {
        let key = f(1111);
        let source = f(2222);
        ResponseAttestationCircuit {
            agent_key_proof: Some(key),
            source_data_hash: Some(source),
            agent_did_hash: Some(hash(&[key])),
            response_hash: Some(hash(&[source, key, f(ts)])),
            timestamp: Some(f(ts)),
            min_timestamp: Some(f(min)),
            max_timestamp: Some(f(max)),
        }
    }

    #[test]
    fn attestation_window_is_inclusive() {
        assert!(satisfied(attestation(1_000, 900, 1_100)));
        assert!(satisfied(attestation(900, 900, 1_100)));
        assert!(satisfied(attestation(1_100, 900, 1_100)));
        assert!(!satisfied(attestation(899, 900, 1_100)));
        assert!(!satisfied(attestation(1_101, 900, 1_100)));
    }

    #[test]
    fn attestation_rejects_foreign_agent_key() {
        let mut c = attestation(1_000, 900, 1_100);
        c.agent_did_hash = Some(hash(&[f(9999)]));
        assert!(!satisfied(c));
    }

    #[test]
    fn balance_boundary() {
        let c = |balance, threshold| BalanceRangeCircuit {
            balance: Some(f(balance)),
            threshold: Some(f(threshold)),
        };
        assert!(satisfied(c(100, 100)));
        assert!(satisfied(c(101, 100)));
        assert!(!satisfied(c(99, 100)));
        assert!(satisfied(c(0, 0)));
        assert!(satisfied(c(u64::MAX, 0)));
    }

    #[test]
    fn capability_requires_score_and_bindings() {
        let test_hash = f(31337);
        let did_hash = f(5150);
        let build = |score: u64, min: u64| AgentCapabilityCircuit {
            actual_score: Some(f(score)),
            test_hash: Some(test_hash),
            min_score: Some(f(min)),
            agent_did_hash: Some(did_hash),
            capability_hash: Some(hash(&[test_hash, f(score)])),
            agent_test_binding: Some(hash(&[test_hash, did_hash])),
        };
        assert!(satisfied(build(80, 70)));
        assert!(!satisfied(build(60, 70)));

        let mut wrong_binding = build(80, 70);
        wrong_binding.agent_did_hash = Some(f(1));
        assert!(!satisfied(wrong_binding));
    }

    #[test]
    fn blank_circuits_synthesize_in_setup_mode() {
        use ark_relations::r1cs::SynthesisMode;
        let cs = ConstraintSystem::<Fr>::new_ref();
        cs.set_mode(SynthesisMode::Setup);
        AnyCircuit::ResponseAttestation(ResponseAttestationCircuit::<Fr>::default())
            .generate_constraints(cs.clone())
            .unwrap();
        assert_eq!(cs.num_instance_variables(), 1 + 5);
        assert!(cs.num_constraints() > 0);
    }
}
