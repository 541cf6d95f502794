//! Typed circuit assignments.
//!
//! A [`Witness`] carries every value a circuit needs, private and public,
//! as curve-independent [`FieldElement`]s or integers. The prover turns it
//! into a concrete circuit over whichever field the backend runs.

use std::fmt;

use ark_ff::PrimeField;
use serde::{Deserialize, Serialize};

use super::circuit::{
    AgentCapabilityCircuit, AnyCircuit, BalanceRangeCircuit, ResponseAttestationCircuit,
    WalletOwnershipCircuit,
};
use super::field::FieldElement;

/// The four statement shapes the prover knows how to compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitKind {
    WalletOwnership,
    ResponseAttestation,
    BalanceRange,
    AgentCapability,
}

impl CircuitKind {
    /// The blank circuit used for key generation.
    pub fn blank<F: PrimeField>(self) -> AnyCircuit<F> {
        match self {
            CircuitKind::WalletOwnership => AnyCircuit::WalletOwnership(Default::default()),
            CircuitKind::ResponseAttestation => {
                AnyCircuit::ResponseAttestation(Default::default())
            }
            CircuitKind::BalanceRange => AnyCircuit::BalanceRange(Default::default()),
            CircuitKind::AgentCapability => AnyCircuit::AgentCapability(Default::default()),
        }
    }

    /// Number of public inputs the verifier expects.
    pub fn public_input_count(self) -> usize {
        match self {
            CircuitKind::WalletOwnership => 2,
            CircuitKind::ResponseAttestation => 5,
            CircuitKind::BalanceRange => 1,
            CircuitKind::AgentCapability => 4,
        }
    }
}

impl fmt::Display for CircuitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitKind::WalletOwnership => "wallet_ownership",
            CircuitKind::ResponseAttestation => "response_attestation",
            CircuitKind::BalanceRange => "balance_range",
            CircuitKind::AgentCapability => "agent_capability",
        };
        f.write_str(name)
    }
}

/// A full assignment for one of the circuits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "circuit", rename_all = "snake_case")]
pub enum Witness {
    WalletOwnership {
        response: FieldElement,
        challenge: FieldElement,
        public_key_hash: FieldElement,
    },
    ResponseAttestation {
        agent_key_proof: FieldElement,
        source_data_hash: FieldElement,
        agent_did_hash: FieldElement,
        response_hash: FieldElement,
        timestamp: u64,
        min_timestamp: u64,
        max_timestamp: u64,
    },
    BalanceRange {
        balance: u64,
        threshold: u64,
    },
    AgentCapability {
        actual_score: u64,
        test_hash: FieldElement,
        min_score: u64,
        agent_did_hash: FieldElement,
        capability_hash: FieldElement,
        agent_test_binding: FieldElement,
    },
}

impl Witness {
    pub fn kind(&self) -> CircuitKind {
        match self {
            Witness::WalletOwnership { .. } => CircuitKind::WalletOwnership,
            Witness::ResponseAttestation { .. } => CircuitKind::ResponseAttestation,
            Witness::BalanceRange { .. } => CircuitKind::BalanceRange,
            Witness::AgentCapability { .. } => CircuitKind::AgentCapability,
        }
    }

    /// Public inputs in circuit allocation order.
    pub fn public_inputs(&self) -> Vec<FieldElement> {
        match self {
            Witness::WalletOwnership {
                challenge,
                public_key_hash,
                ..
            } => vec![*challenge, *public_key_hash],
            Witness::ResponseAttestation {
                agent_did_hash,
                response_hash,
                timestamp,
                min_timestamp,
                max_timestamp,
                ..
            } => vec![
                *agent_did_hash,
                *response_hash,
                FieldElement::from_u64(*timestamp),
                FieldElement::from_u64(*min_timestamp),
                FieldElement::from_u64(*max_timestamp),
            ],
            Witness::BalanceRange { threshold, .. } => vec![FieldElement::from_u64(*threshold)],
            Witness::AgentCapability {
                min_score,
                agent_did_hash,
                capability_hash,
                agent_test_binding,
                ..
            } => vec![
                FieldElement::from_u64(*min_score),
                *agent_did_hash,
                *capability_hash,
                *agent_test_binding,
            ],
        }
    }

    /// Populated circuit over `F`.
    pub fn to_circuit<F: PrimeField>(&self) -> AnyCircuit<F> {
        let fe = |x: &FieldElement| Some(x.to_field::<F>());
        let int = |x: &u64| Some(F::from(*x));
        match self {
            Witness::WalletOwnership {
                response,
                challenge,
                public_key_hash,
            } => AnyCircuit::WalletOwnership(WalletOwnershipCircuit {
                response: fe(response),
                challenge: fe(challenge),
                public_key_hash: fe(public_key_hash),
            }),
            Witness::ResponseAttestation {
                agent_key_proof,
                source_data_hash,
                agent_did_hash,
                response_hash,
                timestamp,
                min_timestamp,
                max_timestamp,
            } => AnyCircuit::ResponseAttestation(ResponseAttestationCircuit {
                agent_key_proof: fe(agent_key_proof),
                source_data_hash: fe(source_data_hash),
                agent_did_hash: fe(agent_did_hash),
                response_hash: fe(response_hash),
                timestamp: int(timestamp),
                min_timestamp: int(min_timestamp),
                max_timestamp: int(max_timestamp),
            }),
            Witness::BalanceRange { balance, threshold } => {
                AnyCircuit::BalanceRange(BalanceRangeCircuit {
                    balance: int(balance),
                    threshold: int(threshold),
                })
            }
            Witness::AgentCapability {
                actual_score,
                test_hash,
                min_score,
                agent_did_hash,
                capability_hash,
                agent_test_binding,
            } => AnyCircuit::AgentCapability(AgentCapabilityCircuit {
                actual_score: int(actual_score),
                test_hash: fe(test_hash),
                min_score: int(min_score),
                agent_did_hash: fe(agent_did_hash),
                capability_hash: fe(capability_hash),
                agent_test_binding: fe(agent_test_binding),
            }),
        }
    }
}
