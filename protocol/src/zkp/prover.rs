//! # Prover Service
//!
//! Owns compiled circuits and turns witnesses into proofs and back.
//!
//! The workflow:
//!
//! 1. **Compile**: `compile(circuit_id, kind)` synthesizes the blank
//!    circuit and runs the scheme's setup: Groth16 keys from the SRS
//!    source, or transparent halo2 keys (see [`super::plonk`]). Keys are
//!    cached by ID; compiling an ID twice is a no-op.
//!
//! 2. **Prove**: `prove(circuit_id, witness)` first replays the witness
//!    through a plain constraint system. Neither backend reports a bad
//!    assignment usefully (ark-groth16 builds garbage, halo2 fails deep in
//!    the prover), so we refuse up front with
//!    [`ProverError::UnsatisfiedWitness`].
//!
//! 3. **Verify**: `verify(proof, public_inputs)` returns `Ok(false)` for a
//!    proof that simply doesn't check out, and `Err` for everything that
//!    means "you called me wrong": unknown circuit, wrong backend, bytes
//!    that aren't a proof.
//!
//! Proving is CPU-bound and synchronous. Async callers should hop onto
//! `spawn_blocking`; the service is `Send + Sync` and meant to live in an
//! `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use ark_bn254::Bn254;
use ark_ec::pairing::Pairing;
use ark_ff::PrimeField;
use ark_groth16::{Groth16, PreparedVerifyingKey, ProvingKey};
use ark_relations::r1cs::{
    ConstraintSynthesizer, ConstraintSystem, SynthesisError, SynthesisMode,
};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_snark::SNARK;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Span};

use super::field::FieldElement;
use super::plonk::{self, ArkFr, PlonkKeys};
use super::proof::{Proof, ProofScheme, SrsMode};
use super::witness::{CircuitKind, Witness};
use super::{
    AGENT_CAPABILITY_CIRCUIT, BALANCE_RANGE_CIRCUIT, RESPONSE_ATTESTATION_CIRCUIT,
    WALLET_OWNERSHIP_CIRCUIT,
};
use crate::config::ProverConfig;
use crate::crypto::blake3_hash_multi;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ProverError {
    /// `prove`/`verify` on an ID nobody compiled.
    #[error("circuit not compiled: {0}")]
    CircuitNotCompiled(String),

    /// The witness or proof belongs to a different circuit shape.
    #[error("circuit {circuit_id} is {expected}, got assignment for {actual}")]
    AssignmentMismatch {
        circuit_id: String,
        expected: CircuitKind,
        actual: CircuitKind,
    },

    /// Wrong number of public inputs for the circuit.
    #[error("circuit {circuit_id} expects {expected} public inputs, got {actual}")]
    PublicInputCount {
        circuit_id: String,
        expected: usize,
        actual: usize,
    },

    /// The proof was made by a different backend than the compiled keys.
    #[error("proof scheme {proof} does not match compiled keys ({keys})")]
    InvalidKeyType { proof: ProofScheme, keys: ProofScheme },

    /// The assignment violates at least one constraint.
    #[error("witness does not satisfy circuit {circuit_id} (first failing constraint: {constraint})")]
    UnsatisfiedWitness {
        circuit_id: String,
        constraint: String,
    },

    #[error("proof serialization failed: {0}")]
    Serialization(String),

    #[error("constraint synthesis failed: {0}")]
    Synthesis(String),
}

pub(super) fn synthesis(e: SynthesisError) -> ProverError {
    ProverError::Synthesis(e.to_string())
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Groth16 keys for one pairing curve.
pub struct Groth16Keys<E: Pairing> {
    pk: ProvingKey<E>,
    pvk: PreparedVerifyingKey<E>,
}

/// Keys for whichever backend the circuit was compiled under.
pub enum CircuitKeys {
    Groth16(Groth16Keys<Bn254>),
    Plonk(PlonkKeys),
}

impl CircuitKeys {
    pub fn scheme(&self) -> ProofScheme {
        match self {
            CircuitKeys::Groth16(_) => ProofScheme::Groth16,
            CircuitKeys::Plonk(_) => ProofScheme::Plonk,
        }
    }
}

/// A circuit that went through setup.
pub struct CompiledCircuit {
    pub kind: CircuitKind,
    pub num_constraints: usize,
    pub keys: CircuitKeys,
}

/// Summary of a compiled circuit, for status output.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CircuitInfo {
    pub circuit_id: String,
    pub kind: CircuitKind,
    pub num_constraints: usize,
    pub scheme: ProofScheme,
}

// ---------------------------------------------------------------------------
// Curve-generic plumbing
// ---------------------------------------------------------------------------

fn count_constraints<F: PrimeField>(kind: CircuitKind) -> Result<usize, ProverError> {
    let cs = ConstraintSystem::<F>::new_ref();
    cs.set_mode(SynthesisMode::Setup);
    kind.blank::<F>()
        .generate_constraints(cs.clone())
        .map_err(synthesis)?;
    Ok(cs.num_constraints())
}

fn setup<E: Pairing>(kind: CircuitKind, rng: &mut StdRng) -> Result<Groth16Keys<E>, ProverError> {
    let (pk, vk) = Groth16::<E>::circuit_specific_setup(kind.blank::<E::ScalarField>(), rng)
        .map_err(synthesis)?;
    let pvk = Groth16::<E>::process_vk(&vk).map_err(synthesis)?;
    Ok(Groth16Keys { pk, pvk })
}

fn check_satisfied<F: PrimeField>(circuit_id: &str, witness: &Witness) -> Result<(), ProverError> {
    let cs = ConstraintSystem::<F>::new_ref();
    witness
        .to_circuit::<F>()
        .generate_constraints(cs.clone())
        .map_err(synthesis)?;
    if !cs.is_satisfied().map_err(synthesis)? {
        let constraint = cs
            .which_is_unsatisfied()
            .map_err(synthesis)?
            .unwrap_or_else(|| "unknown".to_string());
        return Err(ProverError::UnsatisfiedWitness {
            circuit_id: circuit_id.to_string(),
            constraint,
        });
    }
    Ok(())
}

fn prove_with<E: Pairing>(
    keys: &Groth16Keys<E>,
    circuit_id: &str,
    witness: &Witness,
) -> Result<Vec<u8>, ProverError> {
    check_satisfied::<E::ScalarField>(circuit_id, witness)?;

    let mut rng = rand::thread_rng();
    let proof = Groth16::<E>::prove(&keys.pk, witness.to_circuit::<E::ScalarField>(), &mut rng)
        .map_err(synthesis)?;

    let mut bytes = Vec::new();
    proof
        .serialize_compressed(&mut bytes)
        .map_err(|e| ProverError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn verify_with<E: Pairing>(
    keys: &Groth16Keys<E>,
    data: &[u8],
    public_inputs: &[FieldElement],
) -> Result<bool, ProverError> {
    let proof = ark_groth16::Proof::<E>::deserialize_compressed(data)
        .map_err(|e| ProverError::Serialization(e.to_string()))?;
    let inputs: Vec<E::ScalarField> = public_inputs.iter().map(FieldElement::to_field).collect();
    Groth16::<E>::verify_with_processed_vk(&keys.pvk, &inputs, &proof).map_err(synthesis)
}

// ---------------------------------------------------------------------------
// ProverService
// ---------------------------------------------------------------------------

/// Compiles circuits once and proves/verifies against the cached keys.
pub struct ProverService {
    scheme: ProofScheme,
    srs: SrsMode,
    circuits: RwLock<HashMap<String, Arc<CompiledCircuit>>>,
    span: Span,
}

impl ProverService {
    pub fn new(scheme: ProofScheme, srs: SrsMode) -> Self {
        Self {
            scheme,
            srs,
            circuits: RwLock::new(HashMap::new()),
            span: info_span!("prover", scheme = %scheme),
        }
    }

    pub fn from_config(config: &ProverConfig) -> Self {
        Self::new(config.scheme, config.srs.clone())
    }

    /// Log under the caller's span instead of the default one.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn scheme(&self) -> ProofScheme {
        self.scheme
    }

    /// MiMC hash in this service's field.
    pub fn mimc_hash(&self, inputs: &[FieldElement]) -> FieldElement {
        self.scheme.hash(inputs)
    }

    /// Hash bytes into this service's field.
    pub fn field_from_bytes(&self, data: &[u8]) -> FieldElement {
        self.scheme.field_from_bytes(data)
    }

    fn setup_rng(&self, circuit_id: &str) -> StdRng {
        match &self.srs {
            SrsMode::Unsafe => StdRng::from_entropy(),
            SrsMode::File(path) => match std::fs::read(path) {
                Ok(srs) => {
                    StdRng::from_seed(blake3_hash_multi(&[srs.as_slice(), circuit_id.as_bytes()]))
                }
                Err(e) => {
                    warn!(
                        parent: &self.span,
                        path = %path.display(),
                        error = %e,
                        "SRS file unavailable, falling back to UNSAFE ephemeral setup; \
                         proofs from this node will not verify anywhere else"
                    );
                    StdRng::from_entropy()
                }
            },
        }
    }

    /// Compile `circuit_id` as a `kind` circuit. No-op if already compiled.
    pub fn compile(&self, circuit_id: &str, kind: CircuitKind) -> Result<(), ProverError> {
        if let Some(existing) = self.circuits.read().get(circuit_id) {
            debug!(parent: &self.span, circuit_id, kind = %existing.kind, "circuit already compiled");
            return Ok(());
        }

        let compiled = match self.scheme {
            ProofScheme::Groth16 => {
                let mut rng = self.setup_rng(circuit_id);
                CompiledCircuit {
                    kind,
                    num_constraints: count_constraints::<ark_bn254::Fr>(kind)?,
                    keys: CircuitKeys::Groth16(setup::<Bn254>(kind, &mut rng)?),
                }
            }
            ProofScheme::Plonk => {
                let keys = plonk::setup(kind)?;
                CompiledCircuit {
                    kind,
                    num_constraints: keys.num_constraints(),
                    keys: CircuitKeys::Plonk(keys),
                }
            }
        };

        info!(
            parent: &self.span,
            circuit_id,
            kind = %kind,
            constraints = compiled.num_constraints,
            "circuit compiled"
        );
        self.circuits
            .write()
            .entry(circuit_id.to_string())
            .or_insert_with(|| Arc::new(compiled));
        Ok(())
    }

    /// Compile the four standard circuits under their well-known IDs.
    pub fn compile_standard_circuits(&self) -> Result<(), ProverError> {
        self.compile(WALLET_OWNERSHIP_CIRCUIT, CircuitKind::WalletOwnership)?;
        self.compile(RESPONSE_ATTESTATION_CIRCUIT, CircuitKind::ResponseAttestation)?;
        self.compile(BALANCE_RANGE_CIRCUIT, CircuitKind::BalanceRange)?;
        self.compile(AGENT_CAPABILITY_CIRCUIT, CircuitKind::AgentCapability)
    }

    pub fn is_compiled(&self, circuit_id: &str) -> bool {
        self.circuits.read().contains_key(circuit_id)
    }

    pub fn compiled_circuits(&self) -> Vec<CircuitInfo> {
        let mut infos: Vec<CircuitInfo> = self
            .circuits
            .read()
            .iter()
            .map(|(id, c)| CircuitInfo {
                circuit_id: id.clone(),
                kind: c.kind,
                num_constraints: c.num_constraints,
                scheme: c.keys.scheme(),
            })
            .collect();
        infos.sort_by(|a, b| a.circuit_id.cmp(&b.circuit_id));
        infos
    }

    fn compiled(&self, circuit_id: &str) -> Result<Arc<CompiledCircuit>, ProverError> {
        self.circuits
            .read()
            .get(circuit_id)
            .cloned()
            .ok_or_else(|| ProverError::CircuitNotCompiled(circuit_id.to_string()))
    }

    /// Prove `witness` against the compiled `circuit_id`.
    pub fn prove(&self, circuit_id: &str, witness: &Witness) -> Result<Proof, ProverError> {
        let compiled = self.compiled(circuit_id)?;
        if compiled.kind != witness.kind() {
            return Err(ProverError::AssignmentMismatch {
                circuit_id: circuit_id.to_string(),
                expected: compiled.kind,
                actual: witness.kind(),
            });
        }

        let data = match &compiled.keys {
            CircuitKeys::Groth16(keys) => prove_with(keys, circuit_id, witness)?,
            CircuitKeys::Plonk(keys) => {
                check_satisfied::<ArkFr>(circuit_id, witness)?;
                plonk::prove(keys, witness)?
            }
        };
        debug!(parent: &self.span, circuit_id, bytes = data.len(), "proof generated");

        Ok(Proof {
            data,
            public_inputs: witness
                .public_inputs()
                .into_iter()
                .map(|x| compiled.keys.scheme().reduce(x))
                .collect(),
            circuit_id: circuit_id.to_string(),
            scheme: compiled.keys.scheme(),
        })
    }

    /// Verify `proof` against explicit public inputs.
    ///
    /// `Ok(false)` means the proof is well-formed but wrong.
    pub fn verify(&self, proof: &Proof, public_inputs: &[FieldElement]) -> Result<bool, ProverError> {
        let compiled = self.compiled(&proof.circuit_id)?;
        let keys_scheme = compiled.keys.scheme();
        if proof.scheme != keys_scheme {
            return Err(ProverError::InvalidKeyType {
                proof: proof.scheme,
                keys: keys_scheme,
            });
        }
        let expected = compiled.kind.public_input_count();
        if public_inputs.len() != expected {
            return Err(ProverError::PublicInputCount {
                circuit_id: proof.circuit_id.clone(),
                expected,
                actual: public_inputs.len(),
            });
        }

        let valid = match &compiled.keys {
            CircuitKeys::Groth16(keys) => verify_with(keys, &proof.data, public_inputs)?,
            CircuitKeys::Plonk(keys) => plonk::verify(keys, &proof.data, public_inputs)?,
        };
        if !valid {
            debug!(parent: &self.span, circuit_id = %proof.circuit_id, "proof rejected");
        }
        Ok(valid)
    }

    /// Verify against the public inputs the proof carries.
    pub fn verify_embedded(&self, proof: &Proof) -> Result<bool, ProverError> {
        self.verify(proof, &proof.public_inputs)
    }
}

impl std::fmt::Debug for ProverService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProverService")
            .field("scheme", &self.scheme)
            .field("srs", &self.srs)
            .field("circuits", &self.circuits.read().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn balance(balance: u64, threshold: u64) -> Witness {
        Witness::BalanceRange { balance, threshold }
    }

    fn service() -> ProverService {
        ProverService::new(ProofScheme::Groth16, SrsMode::Unsafe)
    }

    #[test]
    fn prove_before_compile_fails() {
        let prover = service();
        assert!(matches!(
            prover.prove(BALANCE_RANGE_CIRCUIT, &balance(10, 5)),
            Err(ProverError::CircuitNotCompiled(_))
        ));
    }

    #[test]
    fn compile_is_idempotent() {
        let prover = service();
        prover
            .compile(BALANCE_RANGE_CIRCUIT, CircuitKind::BalanceRange)
            .unwrap();
        let before = prover.compiled(BALANCE_RANGE_CIRCUIT).unwrap();
        prover
            .compile(BALANCE_RANGE_CIRCUIT, CircuitKind::BalanceRange)
            .unwrap();
        let after = prover.compiled(BALANCE_RANGE_CIRCUIT).unwrap();
        assert!(Arc::ptr_eq(&before, &after), "second compile must not replace keys");
        assert_eq!(prover.compiled_circuits().len(), 1);
    }

    #[test]
    fn balance_proof_round_trip_and_boundary() {
        let prover = service();
        prover
            .compile(BALANCE_RANGE_CIRCUIT, CircuitKind::BalanceRange)
            .unwrap();

        let proof = prover.prove(BALANCE_RANGE_CIRCUIT, &balance(100, 100)).unwrap();
        assert!(prover.verify_embedded(&proof).unwrap());

        // Same proof, different threshold: well-formed but false.
        assert!(!prover
            .verify(&proof, &[FieldElement::from_u64(50)])
            .unwrap());

        assert!(matches!(
            prover.prove(BALANCE_RANGE_CIRCUIT, &balance(99, 100)),
            Err(ProverError::UnsatisfiedWitness { .. })
        ));
    }

    #[test]
    fn wallet_ownership_soundness() {
        let prover = service();
        prover
            .compile(WALLET_OWNERSHIP_CIRCUIT, CircuitKind::WalletOwnership)
            .unwrap();

        let response = prover.field_from_bytes(b"secret response");
        let challenge = prover.field_from_bytes(b"nonce-1");
        let public_key_hash = prover.mimc_hash(&[response, challenge]);

        let good = Witness::WalletOwnership {
            response,
            challenge,
            public_key_hash,
        };
        let proof = prover.prove(WALLET_OWNERSHIP_CIRCUIT, &good).unwrap();
        assert!(prover.verify_embedded(&proof).unwrap());

        // Replaying the proof against a fresh challenge fails.
        let other_challenge = prover.field_from_bytes(b"nonce-2");
        assert!(!prover
            .verify(&proof, &[other_challenge, public_key_hash])
            .unwrap());

        let forged = Witness::WalletOwnership {
            response: prover.field_from_bytes(b"guess"),
            challenge,
            public_key_hash,
        };
        assert!(matches!(
            prover.prove(WALLET_OWNERSHIP_CIRCUIT, &forged),
            Err(ProverError::UnsatisfiedWitness { .. })
        ));
    }

    #[test]
    fn wrong_witness_kind_is_rejected() {
        let prover = service();
        prover
            .compile(BALANCE_RANGE_CIRCUIT, CircuitKind::BalanceRange)
            .unwrap();
        let witness = Witness::WalletOwnership {
            response: FieldElement::ZERO,
            challenge: FieldElement::ZERO,
            public_key_hash: FieldElement::ZERO,
        };
        assert!(matches!(
            prover.prove(BALANCE_RANGE_CIRCUIT, &witness),
            Err(ProverError::AssignmentMismatch { .. })
        ));
    }

    #[test]
    fn verify_error_cases() {
        let prover = service();
        prover
            .compile(BALANCE_RANGE_CIRCUIT, CircuitKind::BalanceRange)
            .unwrap();
        let proof = prover.prove(BALANCE_RANGE_CIRCUIT, &balance(5, 1)).unwrap();

        let mut unknown = proof.clone();
        unknown.circuit_id = "nope".into();
        assert!(matches!(
            prover.verify_embedded(&unknown),
            Err(ProverError::CircuitNotCompiled(_))
        ));

        let mut wrong_scheme = proof.clone();
        wrong_scheme.scheme = ProofScheme::Plonk;
        assert!(matches!(
            prover.verify_embedded(&wrong_scheme),
            Err(ProverError::InvalidKeyType { .. })
        ));

        let mut garbage = proof.clone();
        garbage.data = vec![1, 2, 3];
        assert!(matches!(
            prover.verify_embedded(&garbage),
            Err(ProverError::Serialization(_))
        ));

        assert!(matches!(
            prover.verify(&proof, &[]),
            Err(ProverError::PublicInputCount { .. })
        ));
    }

    #[test]
    fn plonk_backend_round_trip() {
        let prover = ProverService::new(ProofScheme::Plonk, SrsMode::Unsafe);
        prover
            .compile(BALANCE_RANGE_CIRCUIT, CircuitKind::BalanceRange)
            .unwrap();
        let proof = prover.prove(BALANCE_RANGE_CIRCUIT, &balance(7, 3)).unwrap();
        assert_eq!(proof.scheme, ProofScheme::Plonk);
        assert!(prover.verify_embedded(&proof).unwrap());

        // Well-formed but for a different threshold.
        assert!(!prover.verify(&proof, &[FieldElement::from_u64(4)]).unwrap());

        assert!(matches!(
            prover.prove(BALANCE_RANGE_CIRCUIT, &balance(2, 3)),
            Err(ProverError::UnsatisfiedWitness { .. })
        ));

        let mut truncated = proof.clone();
        truncated.data.truncate(10);
        assert!(matches!(
            prover.verify_embedded(&truncated),
            Err(ProverError::Serialization(_))
        ));
    }

    #[test]
    fn plonk_setup_is_transparent() {
        // No shared file, yet independently compiled keys interoperate.
        let alice = ProverService::new(ProofScheme::Plonk, SrsMode::Unsafe);
        let bob = ProverService::new(
            ProofScheme::Plonk,
            SrsMode::File("/definitely/not/here.srs".into()),
        );
        alice
            .compile(WALLET_OWNERSHIP_CIRCUIT, CircuitKind::WalletOwnership)
            .unwrap();
        bob.compile(WALLET_OWNERSHIP_CIRCUIT, CircuitKind::WalletOwnership)
            .unwrap();

        let response = alice.field_from_bytes(b"secret response");
        let challenge = alice.field_from_bytes(b"nonce-1");
        let witness = Witness::WalletOwnership {
            response,
            challenge,
            public_key_hash: alice.mimc_hash(&[response, challenge]),
        };
        let proof = alice.prove(WALLET_OWNERSHIP_CIRCUIT, &witness).unwrap();
        assert!(bob.verify_embedded(&proof).unwrap());

        // Groth16 keys cannot check a PLONK proof.
        let groth = service();
        groth
            .compile(WALLET_OWNERSHIP_CIRCUIT, CircuitKind::WalletOwnership)
            .unwrap();
        assert!(matches!(
            groth.verify_embedded(&proof),
            Err(ProverError::InvalidKeyType { .. })
        ));
    }

    #[test]
    fn shared_srs_file_yields_interoperable_keys() {
        let mut srs = tempfile::NamedTempFile::new().unwrap();
        srs.write_all(b"lango shared ceremony transcript").unwrap();
        let mode = SrsMode::File(srs.path().to_path_buf());

        let alice = ProverService::new(ProofScheme::Groth16, mode.clone());
        let bob = ProverService::new(ProofScheme::Groth16, mode);
        alice
            .compile(BALANCE_RANGE_CIRCUIT, CircuitKind::BalanceRange)
            .unwrap();
        bob.compile(BALANCE_RANGE_CIRCUIT, CircuitKind::BalanceRange)
            .unwrap();

        let proof = alice.prove(BALANCE_RANGE_CIRCUIT, &balance(1_000, 10)).unwrap();
        assert!(bob.verify_embedded(&proof).unwrap());
    }

    #[test]
    fn missing_srs_file_falls_back_to_unsafe() {
        let prover = ProverService::new(
            ProofScheme::Groth16,
            SrsMode::File("/definitely/not/here.srs".into()),
        );
        prover
            .compile(BALANCE_RANGE_CIRCUIT, CircuitKind::BalanceRange)
            .unwrap();
        let proof = prover.prove(BALANCE_RANGE_CIRCUIT, &balance(2, 1)).unwrap();
        assert!(prover.verify_embedded(&proof).unwrap());
    }
}
