//! # Response Attestation
//!
//! Lets an agent prove "I produced this response, and I produced it
//! around time T" without exposing its key material:
//!
//! ```text
//! agent_key_proof  = F(sign(wallet, ATTESTATION_DOMAIN))    private
//! source_data_hash = F(blake3(response JSON))                private
//! agent_did_hash   = H(agent_key_proof)                      public
//! response_hash    = H(source_data_hash, agent_key_proof, ts) public
//! min_ts <= ts <= max_ts                                     public window
//! ```
//!
//! `agent_did_hash` is stable per wallet (the signature is deterministic),
//! so a peer that saw one attestation from us recognises the next one.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info_span, Span};

use super::FirewallError;
use crate::crypto::blake3_hash;
use crate::identity::IdentityProvider;
use crate::zkp::{FieldElement, Proof, ProverService, Witness, RESPONSE_ATTESTATION_CIRCUIT};

const ATTESTATION_DOMAIN: &[u8] = b"lango/firewall/attestation-key";

/// A response-attestation proof plus its public inputs in readable form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attestation {
    pub proof: Proof,
    pub agent_did_hash: FieldElement,
    pub response_hash: FieldElement,
    /// Unix seconds.
    pub timestamp: u64,
    pub min_timestamp: u64,
    pub max_timestamp: u64,
}

impl Attestation {
    pub fn public_inputs(&self) -> Vec<FieldElement> {
        vec![
            self.agent_did_hash,
            self.response_hash,
            FieldElement::from_u64(self.timestamp),
            FieldElement::from_u64(self.min_timestamp),
            FieldElement::from_u64(self.max_timestamp),
        ]
    }
}

fn unix_now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

/// Produces attestations for the local agent.
pub struct ResponseAttestor {
    prover: Arc<ProverService>,
    identity: Arc<IdentityProvider>,
    window: Duration,
    span: Span,
}

impl ResponseAttestor {
    pub fn new(prover: Arc<ProverService>, identity: Arc<IdentityProvider>, window: Duration) -> Self {
        Self {
            prover,
            identity,
            window,
            span: info_span!("attestation"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    fn agent_key_proof(&self) -> Result<FieldElement, FirewallError> {
        let signature = self.identity.sign(ATTESTATION_DOMAIN)?;
        Ok(self.prover.field_from_bytes(&signature))
    }

    /// Public hash peers can pin our attestations to.
    pub fn agent_did_hash(&self) -> Result<FieldElement, FirewallError> {
        Ok(self.prover.mimc_hash(&[self.agent_key_proof()?]))
    }

    /// Attest `response` as produced now.
    pub fn attest_response(&self, response: &Value) -> Result<Attestation, FirewallError> {
        self.attest_at(response, unix_now())
    }

    /// Attest `response` as produced at `timestamp` (unix seconds).
    pub fn attest_at(&self, response: &Value, timestamp: u64) -> Result<Attestation, FirewallError> {
        let agent_key_proof = self.agent_key_proof()?;
        let bytes = serde_json::to_vec(response)?;
        let source_data_hash = self.prover.field_from_bytes(&blake3_hash(&bytes));
        let agent_did_hash = self.prover.mimc_hash(&[agent_key_proof]);
        let response_hash = self.prover.mimc_hash(&[
            source_data_hash,
            agent_key_proof,
            FieldElement::from_u64(timestamp),
        ]);
        let window = self.window.as_secs();
        let min_timestamp = timestamp.saturating_sub(window);
        let max_timestamp = timestamp.saturating_add(window);

        let proof = self.prover.prove(
            RESPONSE_ATTESTATION_CIRCUIT,
            &Witness::ResponseAttestation {
                agent_key_proof,
                source_data_hash,
                agent_did_hash,
                response_hash,
                timestamp,
                min_timestamp,
                max_timestamp,
            },
        )?;
        debug!(parent: &self.span, timestamp, "response attested");

        Ok(Attestation {
            proof,
            agent_did_hash,
            response_hash,
            timestamp,
            min_timestamp,
            max_timestamp,
        })
    }
}

impl std::fmt::Debug for ResponseAttestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseAttestor")
            .field("window", &self.window)
            .finish()
    }
}

/// Check an attestation against the wall clock and the proof.
///
/// `Ok(false)` covers a stale window, a wrong agent and a bad proof alike.
pub fn verify_attestation(
    prover: &ProverService,
    attestation: &Attestation,
    expected_agent: Option<FieldElement>,
) -> Result<bool, FirewallError> {
    verify_attestation_at(prover, attestation, expected_agent, unix_now())
}

pub fn verify_attestation_at(
    prover: &ProverService,
    attestation: &Attestation,
    expected_agent: Option<FieldElement>,
    now: u64,
) -> Result<bool, FirewallError> {
    if now < attestation.min_timestamp || now > attestation.max_timestamp {
        return Ok(false);
    }
    if let Some(agent) = expected_agent {
        if prover.scheme().reduce(agent) != attestation.agent_did_hash {
            return Ok(false);
        }
    }
    if attestation.proof.circuit_id != RESPONSE_ATTESTATION_CIRCUIT {
        return Ok(false);
    }
    Ok(prover.verify(&attestation.proof, &attestation.public_inputs())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Ed25519Wallet, WalletProvider};
    use crate::zkp::{CircuitKind, ProofScheme, SrsMode};
    use serde_json::json;

    fn attestor(seed: u8) -> ResponseAttestor {
        let prover = Arc::new(ProverService::new(ProofScheme::Groth16, SrsMode::Unsafe));
        prover
            .compile(RESPONSE_ATTESTATION_CIRCUIT, CircuitKind::ResponseAttestation)
            .unwrap();
        let wallet: Arc<dyn WalletProvider> = Arc::new(Ed25519Wallet::from_seed(&[seed; 32]));
        ResponseAttestor::new(
            prover,
            Arc::new(IdentityProvider::new(wallet)),
            Duration::from_secs(300),
        )
    }

    #[test]
    fn test_fresh_attestation_verifies() {
        let a = attestor(1);
        let att = a.attest_at(&json!({"temp": 21}), 1_700_000_000).unwrap();
        assert_eq!(att.max_timestamp - att.min_timestamp, 600);
        assert_eq!(att.agent_did_hash, a.agent_did_hash().unwrap());

        let agent = Some(a.agent_did_hash().unwrap());
        assert!(verify_attestation_at(&a.prover, &att, agent, 1_700_000_100).unwrap());
    }

    #[test]
    fn test_outside_window_fails() {
        let a = attestor(1);
        let att = a.attest_at(&json!("ok"), 1_700_000_000).unwrap();
        assert!(!verify_attestation_at(&a.prover, &att, None, 1_700_000_301).unwrap());
        assert!(!verify_attestation_at(&a.prover, &att, None, 1_699_999_699).unwrap());
    }

    #[test]
    fn test_wrong_agent_or_tampered_inputs_fail() {
        let a = attestor(1);
        let att = a.attest_at(&json!("ok"), 1_700_000_000).unwrap();
        let now = 1_700_000_000;

        let stranger = a.prover.field_from_bytes(b"someone else");
        assert!(!verify_attestation_at(&a.prover, &att, Some(stranger), now).unwrap());

        let mut tampered = att.clone();
        tampered.response_hash = a.prover.field_from_bytes(b"different response");
        assert!(!verify_attestation_at(&a.prover, &tampered, None, now).unwrap());
    }

    #[test]
    fn test_attest_now_verifies_now() {
        let a = attestor(2);
        let att = a.attest_response(&json!({"k": "v"})).unwrap();
        assert!(verify_attestation(&a.prover, &att, None).unwrap());
    }
}
