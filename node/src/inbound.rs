//! # Inbound Requests
//!
//! What the node does with the handshake and a2a requests the swarm hands
//! it. The swarm has already authenticated the remote peer ID; both
//! handlers pass it down so the trust core can hold the claimed DID to it.
//! Each request runs in its own task and its reply goes back through the
//! swarm on the request's response channel.

use std::sync::Arc;

use async_trait::async_trait;
use libp2p::PeerId;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use lango_p2p::capability::{
    A2aMessage, CapabilityGateway, GatewayError, ResponseStatus, ToolExecutor,
};
use lango_p2p::handshake::{HandshakeMessage, HandshakeProtocol, ProtocolRouter};

use crate::metrics::NodeMetrics;

/// The responder half of the node.
pub struct InboundHandlers {
    router: Arc<ProtocolRouter>,
    gateway: Arc<CapabilityGateway>,
    metrics: Arc<NodeMetrics>,
}

impl InboundHandlers {
    pub fn new(
        router: Arc<ProtocolRouter>,
        gateway: Arc<CapabilityGateway>,
        metrics: Arc<NodeMetrics>,
    ) -> Self {
        Self {
            router,
            gateway,
            metrics,
        }
    }

    /// Answer one handshake request. Failures become a reject so the
    /// initiator learns why instead of waiting out its timeout.
    pub async fn handshake(
        &self,
        peer: PeerId,
        protocol: HandshakeProtocol,
        message: HandshakeMessage,
    ) -> HandshakeMessage {
        let kind = message.kind();
        let (reply, outcome) = self.router.respond(peer, protocol.id(), message).await;
        match outcome {
            Ok(Some(accepted)) => {
                self.metrics.handshake("responder", "accepted");
                self.metrics
                    .handshake_duration_seconds
                    .observe(accepted.elapsed.as_secs_f64());
                info!(%peer, did = %accepted.peer_did, protocol = %accepted.protocol, "session established");
            }
            Ok(None) => {}
            Err(e) => {
                self.metrics.handshake("responder", "failed");
                warn!(%peer, %protocol, request = kind, error = %e, "inbound handshake failed");
            }
        }
        reply
    }

    /// Answer one a2a request. `None` means the request gets no reply and
    /// the remote sees the stream fail.
    pub async fn a2a(&self, peer: PeerId, message: A2aMessage) -> Option<A2aMessage> {
        match self.gateway.on_request(&peer, message).await {
            Ok(reply) => {
                if let A2aMessage::ToolResponse(response) = &reply {
                    self.metrics
                        .tool_calls_total
                        .with_label_values(&[status_label(response.status)])
                        .inc();
                }
                Some(reply)
            }
            Err(e) => {
                debug!(%peer, error = %e, "a2a request refused");
                None
            }
        }
    }
}

fn status_label(status: ResponseStatus) -> &'static str {
    match status {
        ResponseStatus::Ok => "ok",
        ResponseStatus::Denied => "denied",
        ResponseStatus::PaymentRequired => "payment_required",
        ResponseStatus::Error => "error",
    }
}

// ---------------------------------------------------------------------------
// Built-in tools
// ---------------------------------------------------------------------------

/// The tools every node answers without an agent runtime behind it.
pub struct BuiltinTools {
    did: String,
    capabilities: Vec<String>,
}

impl BuiltinTools {
    pub fn new(did: impl Into<String>, capabilities: Vec<String>) -> Self {
        Self {
            did: did.into(),
            capabilities,
        }
    }
}

#[async_trait]
impl ToolExecutor for BuiltinTools {
    async fn execute(&self, tool: &str, params: Value) -> Result<Value, GatewayError> {
        match tool {
            "ping" => Ok(json!({ "pong": true, "did": self.did, "echo": params })),
            "capabilities" => Ok(json!(self.capabilities)),
            other => Err(GatewayError::Execution(format!("unknown tool: {other}"))),
        }
    }
}
