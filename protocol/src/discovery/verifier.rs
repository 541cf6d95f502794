//! Checking (and issuing) capability credentials.

use std::sync::Arc;

use chrono::{Duration, Utc};

use super::card::ZkCredential;
use super::DiscoveryError;
use crate::zkp::{FieldElement, ProverService, Witness, AGENT_CAPABILITY_CIRCUIT};

/// Decides whether a credential on a card is cryptographically sound.
///
/// Freshness is the caller's problem; this only looks at the proof.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, did: &str, credential: &ZkCredential) -> Result<bool, DiscoveryError>;
}

/// Verifies agent-capability proofs with a local [`ProverService`].
///
/// A proof only counts for the card it rides on: its `agent_did_hash`
/// public input must be the hash of that card's DID.
#[derive(Debug, Clone)]
pub struct ProverCredentialVerifier {
    prover: Arc<ProverService>,
}

impl ProverCredentialVerifier {
    pub fn new(prover: Arc<ProverService>) -> Self {
        Self { prover }
    }
}

impl CredentialVerifier for ProverCredentialVerifier {
    fn verify(&self, did: &str, credential: &ZkCredential) -> Result<bool, DiscoveryError> {
        let proof = &credential.proof;
        if proof.circuit_id != AGENT_CAPABILITY_CIRCUIT {
            return Ok(false);
        }
        // [min_score, agent_did_hash, capability_hash, agent_test_binding]
        let Some(agent_did_hash) = proof.public_inputs.get(1) else {
            return Ok(false);
        };
        if *agent_did_hash != self.prover.field_from_bytes(did.as_bytes()) {
            return Ok(false);
        }
        Ok(self.prover.verify_embedded(proof)?)
    }
}

/// Prove `score >= min_score` on capability test `test_id` for `did` and
/// wrap it as a credential valid for `ttl`.
pub fn issue_capability_credential(
    prover: &ProverService,
    did: &str,
    capability_id: &str,
    test_id: &[u8],
    score: u64,
    min_score: u64,
    ttl: Duration,
) -> Result<ZkCredential, DiscoveryError> {
    let test_hash = prover.field_from_bytes(test_id);
    let agent_did_hash = prover.field_from_bytes(did.as_bytes());
    let witness = Witness::AgentCapability {
        actual_score: score,
        test_hash,
        min_score,
        agent_did_hash,
        capability_hash: prover.mimc_hash(&[test_hash, FieldElement::from_u64(score)]),
        agent_test_binding: prover.mimc_hash(&[test_hash, agent_did_hash]),
    };
    let proof = prover.prove(AGENT_CAPABILITY_CIRCUIT, &witness)?;
    let issued_at = Utc::now();
    Ok(ZkCredential {
        capability_id: capability_id.to_string(),
        proof,
        issued_at,
        expires_at: issued_at + ttl,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zkp::{CircuitKind, ProofScheme, SrsMode};

    fn prover() -> Arc<ProverService> {
        let p = Arc::new(ProverService::new(ProofScheme::Groth16, SrsMode::Unsafe));
        p.compile(AGENT_CAPABILITY_CIRCUIT, CircuitKind::AgentCapability)
            .unwrap();
        p
    }

    #[test]
    fn test_credential_bound_to_did() {
        let p = prover();
        let cred = issue_capability_credential(
            &p,
            "did:lango:aa",
            "summarize",
            b"summarize-v1",
            90,
            80,
            Duration::hours(1),
        )
        .unwrap();

        let verifier = ProverCredentialVerifier::new(p.clone());
        assert!(verifier.verify("did:lango:aa", &cred).unwrap());
        // Same proof pasted onto someone else's card.
        assert!(!verifier.verify("did:lango:bb", &cred).unwrap());
    }

    #[test]
    fn test_below_threshold_cannot_be_issued() {
        let p = prover();
        assert!(issue_capability_credential(
            &p,
            "did:lango:aa",
            "summarize",
            b"summarize-v1",
            70,
            80,
            Duration::hours(1),
        )
        .is_err());
    }

    #[test]
    fn test_malformed_proof_is_an_error() {
        let p = prover();
        let mut cred = issue_capability_credential(
            &p,
            "did:lango:aa",
            "summarize",
            b"t",
            90,
            80,
            Duration::hours(1),
        )
        .unwrap();
        cred.proof.data = vec![1, 2, 3];
        assert!(ProverCredentialVerifier::new(p).verify("did:lango:aa", &cred).is_err());
    }
}
