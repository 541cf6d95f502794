//! # Status API
//!
//! Read-only HTTP view of the node's trust state. Nothing here mutates:
//! ACL changes and revocations go through the config file and a restart.
//!
//! ## Endpoints
//!
//! | Method | Path                            | Description                      |
//! |--------|---------------------------------|----------------------------------|
//! | GET    | `/health`                       | Liveness probe                   |
//! | GET    | `/status`                       | Identity and counters            |
//! | GET    | `/sessions`                     | Live handshake sessions          |
//! | GET    | `/firewall/rules`               | ACL in evaluation order          |
//! | GET    | `/reputation/:did`              | One peer's reputation record     |
//! | GET    | `/pricing/:tool`                | Price quote for a tool           |
//! | GET    | `/peers`                        | Every card in the directory      |
//! | GET    | `/peers/capability/:capability` | Cards advertising a capability   |
//! | GET    | `/metrics`                      | Prometheus exposition            |

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use lango_p2p::capability::PricingTable;
use lango_p2p::discovery::PeerDirectory;
use lango_p2p::firewall::Firewall;
use lango_p2p::handshake::ProtocolRouter;
use lango_p2p::reputation::ReputationStore;

use crate::metrics::{metrics_handler, SharedMetrics};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared by every handler. Everything is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub version: String,
    pub did: String,
    pub peer_id: String,
    pub router: Arc<ProtocolRouter>,
    pub firewall: Arc<Firewall>,
    pub reputation: Arc<ReputationStore>,
    pub pricing: Arc<PricingTable>,
    pub directory: Arc<PeerDirectory>,
    pub metrics: SharedMetrics,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    let metrics = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(Arc::clone(&state.metrics));

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/sessions", get(sessions_handler))
        .route("/firewall/rules", get(rules_handler))
        .route("/reputation/:did", get(reputation_handler))
        .route("/pricing/:tool", get(pricing_handler))
        .route("/peers", get(peers_handler))
        .route("/peers/capability/:capability", get(peers_by_capability_handler))
        .with_state(state)
        .merge(metrics)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub did: String,
    pub peer_id: String,
    /// Handshake protocol IDs this node answers.
    pub protocols: Vec<String>,
    pub zk_capable: bool,
    pub active_sessions: usize,
    pub known_peers: usize,
    pub revoked_dids: usize,
    pub acl_rules: usize,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status`
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let ctx = state.router.context();
    Json(StatusResponse {
        version: state.version.clone(),
        did: state.did.clone(),
        peer_id: state.peer_id.clone(),
        protocols: state.router.protocols(),
        zk_capable: ctx.zk_capable(),
        active_sessions: ctx.sessions.len(),
        known_peers: state.directory.len(),
        revoked_dids: state.directory.revoked().len(),
        acl_rules: state.firewall.rules().len(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `GET /sessions`
///
/// Tokens are bearer credentials and are never echoed back.
async fn sessions_handler(State(state): State<AppState>) -> impl IntoResponse {
    let sessions: Vec<serde_json::Value> = state
        .router
        .context()
        .sessions
        .list()
        .into_iter()
        .map(|s| {
            serde_json::json!({
                "peer_did": s.peer_did,
                "protocol": s.protocol.id(),
                "zk_verified": s.zk_verified,
                "created_at": s.created_at,
                "expires_at": s.expires_at,
            })
        })
        .collect();
    Json(sessions)
}

/// `GET /firewall/rules`
async fn rules_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.firewall.rules())
}

/// `GET /reputation/:did`
async fn reputation_handler(
    State(state): State<AppState>,
    Path(did): Path<String>,
) -> Response {
    match state.reputation.get(&did) {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => error(StatusCode::NOT_FOUND, format!("no reputation record for {did}")),
        Err(e) => {
            tracing::error!(error = %e, "reputation lookup failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, "reputation store unavailable")
        }
    }
}

/// `GET /pricing/:tool`
async fn pricing_handler(
    State(state): State<AppState>,
    Path(tool): Path<String>,
) -> impl IntoResponse {
    Json(state.pricing.quote(&tool))
}

/// `GET /peers`
async fn peers_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.directory.all())
}

/// `GET /peers/capability/:capability`
async fn peers_by_capability_handler(
    State(state): State<AppState>,
    Path(capability): Path<String>,
) -> impl IntoResponse {
    Json(state.directory.find_by_capability(&capability))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
