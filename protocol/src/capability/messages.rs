//! Typed agent-to-agent messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::firewall::{Attestation, PriceQuote};

/// Call a tool on the remote agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub id: Uuid,
    pub session_token: String,
    pub peer_did: String,
    pub tool: String,
    #[serde(default)]
    pub params: Value,
}

impl ToolRequest {
    pub fn new(
        session_token: impl Into<String>,
        peer_did: impl Into<String>,
        tool: impl Into<String>,
        params: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_token: session_token.into(),
            peer_did: peer_did.into(),
            tool: tool.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    Denied,
    PaymentRequired,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub request_id: Uuid,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<PriceQuote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation: Option<Attestation>,
}

impl ToolResponse {
    pub fn ok(request_id: Uuid, result: Value) -> Self {
        Self {
            request_id,
            status: ResponseStatus::Ok,
            result: Some(result),
            error: None,
            quote: None,
            attestation: None,
        }
    }

    pub fn denied(request_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            request_id,
            status: ResponseStatus::Denied,
            result: None,
            error: Some(reason.into()),
            quote: None,
            attestation: None,
        }
    }

    pub fn payment_required(request_id: Uuid, quote: PriceQuote) -> Self {
        Self {
            request_id,
            status: ResponseStatus::PaymentRequired,
            result: None,
            error: None,
            quote: Some(quote),
            attestation: None,
        }
    }

    pub fn error(request_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            request_id,
            status: ResponseStatus::Error,
            result: None,
            error: Some(message.into()),
            quote: None,
            attestation: None,
        }
    }
}

/// Ask what a tool costs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuery {
    pub tool: String,
}

/// Every `/lango/a2a/1.0.0` request and reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum A2aMessage {
    ToolRequest(ToolRequest),
    ToolResponse(ToolResponse),
    PriceQuery(PriceQuery),
    PriceQuote(PriceQuote),
}
