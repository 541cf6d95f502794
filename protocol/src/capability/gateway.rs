//! Session check, firewall, execution, outbound shield, attestation.

use std::sync::Arc;

use async_trait::async_trait;
use libp2p::PeerId;
use serde_json::Value;
use tracing::{debug, info_span, warn, Span};

use super::messages::{A2aMessage, PriceQuery, ToolRequest, ToolResponse};
use super::pricing::PricingTable;
use super::GatewayError;
use crate::firewall::{Decision, DenyReason, Firewall, PriceQuote, ResponseAttestor};
use crate::handshake::SessionStore;
use crate::identity::did_from_string;
use crate::reputation::ReputationStore;

/// Runs the actual tools.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tool: &str, params: Value) -> Result<Value, GatewayError>;
}

/// Carries one `/lango/a2a/1.0.0` request to a remote agent and returns
/// its answer. The node implements this on its swarm handle.
#[async_trait]
pub trait A2aTransport: Send + Sync {
    async fn call(&self, peer: PeerId, message: A2aMessage) -> Result<A2aMessage, GatewayError>;
}

/// Front door for every inbound tool call.
///
/// ```text
/// request ─► session token ─► firewall ─► executor ─► owner shield ─► attest ─► response
///                 │              │                         │
///               Denied     Denied / PaymentRequired     Error (withheld)
/// ```
pub struct CapabilityGateway {
    sessions: Arc<SessionStore>,
    firewall: Arc<Firewall>,
    executor: Arc<dyn ToolExecutor>,
    pricing: Arc<PricingTable>,
    reputation: Option<Arc<ReputationStore>>,
    attestor: Option<Arc<ResponseAttestor>>,
    span: Span,
}

impl CapabilityGateway {
    pub fn new(
        sessions: Arc<SessionStore>,
        firewall: Arc<Firewall>,
        executor: Arc<dyn ToolExecutor>,
        pricing: Arc<PricingTable>,
    ) -> Self {
        Self {
            sessions,
            firewall,
            executor,
            pricing,
            reputation: None,
            attestor: None,
            span: info_span!("gateway"),
        }
    }

    pub fn with_reputation(mut self, reputation: Arc<ReputationStore>) -> Self {
        self.reputation = Some(reputation);
        self
    }

    pub fn with_attestor(mut self, attestor: Arc<ResponseAttestor>) -> Self {
        self.attestor = Some(attestor);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn price_query(&self, query: &PriceQuery) -> PriceQuote {
        self.pricing.quote(&query.tool)
    }

    pub async fn handle(&self, request: ToolRequest) -> ToolResponse {
        let id = request.id;
        let peer = request.peer_did.clone();

        if !self.sessions.validate(&peer, &request.session_token) {
            debug!(parent: &self.span, peer = %peer, "request without a live session");
            return ToolResponse::denied(id, "invalid or expired session");
        }

        match self.firewall.check(&peer, &request.tool, &request.params) {
            Decision::Allow => {}
            Decision::RequirePayment(quote) => return ToolResponse::payment_required(id, quote),
            Decision::Deny(reason) => {
                if matches!(reason, DenyReason::OwnerData | DenyReason::RateLimited) {
                    self.record(&peer, false);
                }
                return ToolResponse::denied(id, reason.to_string());
            }
        }

        let result = match self.executor.execute(&request.tool, request.params).await {
            Ok(result) => result,
            Err(e) => {
                warn!(parent: &self.span, peer = %peer, tool = %request.tool, error = %e, "tool failed");
                return ToolResponse::error(id, e.to_string());
            }
        };

        if self.firewall.shield().contains_owner_data(&result) {
            warn!(parent: &self.span, peer = %peer, tool = %request.tool, "tool output withheld: owner data");
            return ToolResponse::error(id, "response withheld");
        }

        let mut response = ToolResponse::ok(id, result);
        if let (Some(attestor), Some(result)) = (&self.attestor, &response.result) {
            match attestor.attest_response(result) {
                Ok(attestation) => response.attestation = Some(attestation),
                Err(e) => {
                    warn!(parent: &self.span, tool = %request.tool, error = %e, "attestation failed");
                }
            }
        }

        self.record(&peer, true);
        response
    }

    fn record(&self, peer: &str, success: bool) {
        let Some(reputation) = &self.reputation else {
            return;
        };
        let outcome = if success {
            reputation.record_success(peer)
        } else {
            reputation.record_failure(peer)
        };
        if let Err(e) = outcome {
            warn!(parent: &self.span, peer, error = %e, "reputation update failed");
        }
    }

    /// Answer one `/lango/a2a/1.0.0` request from `remote_peer`, the peer
    /// ID the transport authenticated. A tool request naming a DID that
    /// doesn't derive `remote_peer` is denied before its token is looked at.
    pub async fn on_request(
        &self,
        remote_peer: &PeerId,
        message: A2aMessage,
    ) -> Result<A2aMessage, GatewayError> {
        match message {
            A2aMessage::ToolRequest(request) => {
                let bound = did_from_string(&request.peer_did)
                    .map(|did| did.peer_id() == *remote_peer)
                    .unwrap_or(false);
                if !bound {
                    warn!(parent: &self.span, peer = %request.peer_did, %remote_peer, "tool request from a foreign connection");
                    return Ok(A2aMessage::ToolResponse(ToolResponse::denied(
                        request.id,
                        "peer DID does not match the connection",
                    )));
                }
                Ok(A2aMessage::ToolResponse(self.handle(request).await))
            }
            A2aMessage::PriceQuery(query) => Ok(A2aMessage::PriceQuote(self.price_query(&query))),
            A2aMessage::ToolResponse(_) | A2aMessage::PriceQuote(_) => {
                Err(GatewayError::UnexpectedMessage)
            }
        }
    }
}

impl std::fmt::Debug for CapabilityGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityGateway")
            .field("firewall", &self.firewall)
            .field("reputation", &self.reputation.is_some())
            .field("attestor", &self.attestor.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::messages::ResponseStatus;
    use crate::config::{FirewallConfig, OwnerProtectionConfig};
    use crate::firewall::{AclRule, WILDCARD};
    use crate::handshake::HandshakeProtocol;
    use serde_json::json;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl ToolExecutor for Echo {
        async fn execute(&self, tool: &str, params: Value) -> Result<Value, GatewayError> {
            match tool {
                "echo" => Ok(params),
                "leak" => Ok(json!({"owner": "Ada Lovelace"})),
                other => Err(GatewayError::Execution(format!("unknown tool {other}"))),
            }
        }
    }

    struct Fixture {
        gateway: CapabilityGateway,
        sessions: Arc<SessionStore>,
        reputation: Arc<ReputationStore>,
    }

    fn fixture() -> Fixture {
        let sessions = Arc::new(SessionStore::new(Duration::from_secs(3600)));
        let firewall = Arc::new(Firewall::new(&FirewallConfig {
            owner: OwnerProtectionConfig {
                name: Some("Ada Lovelace".into()),
                ..Default::default()
            },
            ..FirewallConfig::default()
        }));
        firewall.add_rule(AclRule::allow(WILDCARD, &[])).unwrap();
        let reputation = Arc::new(ReputationStore::open_temporary().unwrap());
        let gateway = CapabilityGateway::new(
            sessions.clone(),
            firewall,
            Arc::new(Echo),
            Arc::new(PricingTable::new("USDC", 0)),
        )
        .with_reputation(reputation.clone());
        Fixture {
            gateway,
            sessions,
            reputation,
        }
    }

    #[tokio::test]
    async fn test_happy_path_records_success() {
        let f = fixture();
        let session = f.sessions.create("did:lango:aa", false, HandshakeProtocol::V1_1);
        let req = ToolRequest::new(&session.token, "did:lango:aa", "echo", json!({"x": 1}));
        let id = req.id;

        let resp = f.gateway.handle(req).await;
        assert_eq!(resp.status, ResponseStatus::Ok);
        assert_eq!(resp.request_id, id);
        assert_eq!(resp.result, Some(json!({"x": 1})));
        assert_eq!(f.reputation.get("did:lango:aa").unwrap().unwrap().successful_exchanges, 1);
    }

    #[tokio::test]
    async fn test_bad_session_denied() {
        let f = fixture();
        f.sessions.create("did:lango:aa", false, HandshakeProtocol::V1_1);
        let resp = f
            .gateway
            .handle(ToolRequest::new("forged", "did:lango:aa", "echo", json!({})))
            .await;
        assert_eq!(resp.status, ResponseStatus::Denied);
    }

    #[tokio::test]
    async fn test_owner_data_in_and_out() {
        let f = fixture();
        let token = f
            .sessions
            .create("did:lango:aa", false, HandshakeProtocol::V1_1)
            .token;

        let inbound = f
            .gateway
            .handle(ToolRequest::new(&token, "did:lango:aa", "echo", json!("Ada Lovelace?")))
            .await;
        assert_eq!(inbound.status, ResponseStatus::Denied);
        assert_eq!(f.reputation.get("did:lango:aa").unwrap().unwrap().failed_exchanges, 1);

        let outbound = f
            .gateway
            .handle(ToolRequest::new(&token, "did:lango:aa", "leak", json!({})))
            .await;
        assert_eq!(outbound.status, ResponseStatus::Error);
        assert!(outbound.result.is_none());
    }

    #[tokio::test]
    async fn test_requests_are_bound_to_the_connection() {
        let f = fixture();
        let wallet = crate::identity::Ed25519Wallet::from_seed(&[4; 32]);
        let did = crate::identity::IdentityProvider::new(Arc::new(wallet)).did().unwrap();
        let token = f.sessions.create(did.id(), false, HandshakeProtocol::V1_1).token;

        let reply = f
            .gateway
            .on_request(
                &did.peer_id(),
                A2aMessage::PriceQuery(PriceQuery {
                    tool: "echo".into(),
                }),
            )
            .await
            .unwrap();
        assert!(matches!(reply, A2aMessage::PriceQuote(q) if q.amount == 0));

        let request = ToolRequest::new(&token, did.id(), "echo", json!({"n": 1}));
        let reply = f
            .gateway
            .on_request(&did.peer_id(), A2aMessage::ToolRequest(request.clone()))
            .await
            .unwrap();
        assert!(matches!(reply, A2aMessage::ToolResponse(r) if r.status == ResponseStatus::Ok));

        // Stolen token and DID, different connection.
        let reply = f
            .gateway
            .on_request(&PeerId::random(), A2aMessage::ToolRequest(request))
            .await
            .unwrap();
        assert!(matches!(reply, A2aMessage::ToolResponse(r) if r.status == ResponseStatus::Denied));

        let err = f
            .gateway
            .on_request(
                &did.peer_id(),
                A2aMessage::ToolResponse(ToolResponse::error(uuid::Uuid::nil(), "x")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UnexpectedMessage));
    }
}
