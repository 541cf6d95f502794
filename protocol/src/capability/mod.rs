//! # Capability Gateway
//!
//! The part of the node that actually does work for other agents, over
//! `/lango/a2a/1.0.0`. Requests carry the session token a handshake
//! issued; nothing runs without one, and nothing runs that the firewall
//! hasn't waved through.

pub mod gateway;
pub mod messages;
pub mod pricing;

use thiserror::Error;

pub use gateway::{A2aTransport, CapabilityGateway, ToolExecutor};
pub use messages::{A2aMessage, PriceQuery, ResponseStatus, ToolRequest, ToolResponse};
pub use pricing::{PricedGate, PricingTable};

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The tool itself failed.
    #[error("tool execution failed: {0}")]
    Execution(String),

    /// A response-type message arrived where a request was expected.
    #[error("unexpected a2a message")]
    UnexpectedMessage,

    /// The request/response transport couldn't deliver the call.
    #[error("a2a transport error: {0}")]
    Transport(String),
}
