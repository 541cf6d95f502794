//! # Capability Firewall
//!
//! Every tool call a peer makes goes through [`Firewall::check`] before
//! anything runs. The checks are ordered cheapest-and-most-absolute first:
//!
//! ```text
//!  payload ──► owner shield ──► reputation ──► ACL + rate limit ──► payment
//!                 │                │                │                  │
//!               Deny             Deny         Deny / no match        RequirePayment
//!                                                   │
//!                                                 Allow
//! ```
//!
//! - **Owner shield** never bends: owner data in a payload is a deny even
//!   for a peer with an allow-everything rule.
//! - **Reputation** is skipped for peers with no record yet.
//! - **ACL** is first-match-wins and fails closed when nothing matches.
//! - **Payment** only applies when a [`PaymentGate`] is wired in.
//!
//! Response attestation is separate: see [`attestation`].

pub mod attestation;
pub mod rules;
pub mod shield;

use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, info_span, Span};

use crate::config::FirewallConfig;
use crate::identity::IdentityError;
use crate::zkp::ProverError;

pub use attestation::{verify_attestation, Attestation, ResponseAttestor};
pub use rules::{glob_match, AclAction, AclRule, WILDCARD};
pub use shield::{OwnerDataKind, OwnerShield};

// ---------------------------------------------------------------------------
// Errors & decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum FirewallError {
    #[error("invalid rule: {0}")]
    InvalidRule(String),

    #[error(transparent)]
    Prover(#[from] ProverError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Price of one call, in the currency's smallest unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub tool: String,
    pub amount: u64,
    pub currency: String,
}

impl PriceQuote {
    pub fn is_free(&self) -> bool {
        self.amount == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenyReason {
    OwnerData,
    LowReputation { score: f64, min: f64 },
    DeniedByRule,
    RateLimited,
    NoMatchingRule,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::OwnerData => f.write_str("payload contains owner data"),
            DenyReason::LowReputation { score, min } => {
                write!(f, "trust score {score:.3} below {min:.3}")
            }
            DenyReason::DeniedByRule => f.write_str("denied by ACL rule"),
            DenyReason::RateLimited => f.write_str("rate limit exceeded"),
            DenyReason::NoMatchingRule => f.write_str("no matching ACL rule"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny(DenyReason),
    RequirePayment(PriceQuote),
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny(_) => "deny",
            Decision::RequirePayment(_) => "payment",
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Where the firewall reads trust scores from.
pub trait ReputationSource: Send + Sync {
    /// `None` for peers with no history.
    fn trust_score(&self, peer_did: &str) -> Option<f64>;
}

/// Paid tools.
pub trait PaymentGate: Send + Sync {
    /// Price for `tool`, `None` if it isn't priced.
    fn quote(&self, tool: &str) -> Option<PriceQuote>;

    /// Consume a prepaid authorization for one call, if the peer has one.
    fn take_authorization(&self, peer_did: &str, tool: &str) -> bool;
}

// ---------------------------------------------------------------------------
// Firewall
// ---------------------------------------------------------------------------

type PeerRateLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock>;

struct RuleEntry {
    rule: AclRule,
    limiter: Option<Arc<PeerRateLimiter>>,
}

impl RuleEntry {
    fn new(rule: AclRule) -> Self {
        let limiter = NonZeroU32::new(rule.rate_limit)
            .map(|per_minute| Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute))));
        Self { rule, limiter }
    }
}

pub struct Firewall {
    rules: RwLock<Vec<RuleEntry>>,
    shield: OwnerShield,
    min_trust_score: f64,
    reputation: Option<Arc<dyn ReputationSource>>,
    payments: Option<Arc<dyn PaymentGate>>,
    span: Span,
}

impl Firewall {
    pub fn new(config: &FirewallConfig) -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            shield: OwnerShield::new(&config.owner),
            min_trust_score: config.min_trust_score,
            reputation: None,
            payments: None,
            span: info_span!("firewall"),
        }
    }

    pub fn with_reputation(mut self, source: Arc<dyn ReputationSource>) -> Self {
        self.reputation = Some(source);
        self
    }

    pub fn with_payment_gate(mut self, gate: Arc<dyn PaymentGate>) -> Self {
        self.payments = Some(gate);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn shield(&self) -> &OwnerShield {
        &self.shield
    }

    /// Append a rule. Adding an identical rule twice keeps one copy.
    pub fn add_rule(&self, rule: AclRule) -> Result<(), FirewallError> {
        rule.validate()?;
        let mut rules = self.rules.write();
        if rules.iter().any(|e| e.rule == rule) {
            return Ok(());
        }
        info!(
            parent: &self.span,
            peer = %rule.peer_did,
            action = ?rule.action,
            tools = ?rule.tools,
            rate_limit = rule.rate_limit,
            "ACL rule added"
        );
        rules.push(RuleEntry::new(rule));
        Ok(())
    }

    /// Drop every rule for `peer_did`. Returns how many went.
    pub fn remove_rule(&self, peer_did: &str) -> usize {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|e| e.rule.peer_did != peer_did);
        let removed = before - rules.len();
        if removed > 0 {
            info!(parent: &self.span, peer = peer_did, removed, "ACL rules removed");
        }
        removed
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> Vec<AclRule> {
        self.rules.read().iter().map(|e| e.rule.clone()).collect()
    }

    /// Decide whether `peer_did` may call `tool` with `payload`.
    pub fn check(&self, peer_did: &str, tool: &str, payload: &Value) -> Decision {
        let decision = self.evaluate(peer_did, tool, payload);
        debug!(parent: &self.span, peer = peer_did, tool, decision = ?decision, "firewall decision");
        decision
    }

    fn evaluate(&self, peer_did: &str, tool: &str, payload: &Value) -> Decision {
        if self.shield.contains_owner_data(payload) {
            return Decision::Deny(DenyReason::OwnerData);
        }

        if let Some(score) = self.reputation.as_ref().and_then(|r| r.trust_score(peer_did)) {
            if score < self.min_trust_score {
                return Decision::Deny(DenyReason::LowReputation {
                    score,
                    min: self.min_trust_score,
                });
            }
        }

        // Clone the limiter out so the rule lock isn't held while we
        // talk to the payment gate.
        let matched = {
            let rules = self.rules.read();
            rules
                .iter()
                .find(|e| e.rule.matches(peer_did, tool))
                .map(|e| (e.rule.action, e.limiter.clone()))
        };
        match matched {
            None => return Decision::Deny(DenyReason::NoMatchingRule),
            Some((AclAction::Deny, _)) => return Decision::Deny(DenyReason::DeniedByRule),
            Some((AclAction::Allow, Some(limiter))) => {
                if limiter.check_key(&peer_did.to_string()).is_err() {
                    return Decision::Deny(DenyReason::RateLimited);
                }
            }
            Some((AclAction::Allow, None)) => {}
        }

        if let Some(gate) = &self.payments {
            if let Some(quote) = gate.quote(tool).filter(|q| !q.is_free()) {
                if !gate.take_authorization(peer_did, tool) {
                    return Decision::RequirePayment(quote);
                }
            }
        }
        Decision::Allow
    }
}

impl fmt::Debug for Firewall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Firewall")
            .field("rules", &self.rules.read().len())
            .field("min_trust_score", &self.min_trust_score)
            .field("shield_active", &self.shield.is_active())
            .field("reputation", &self.reputation.is_some())
            .field("payments", &self.payments.is_some())
            .finish()
    }
}
