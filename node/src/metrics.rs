//! # Prometheus Metrics
//!
//! Scraped at `/metrics` on the API port. Everything lives in a dedicated
//! registry prefixed `lango_`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Handshakes by role and outcome (`accepted`, `failed`).
    pub handshakes_total: IntCounterVec,
    pub handshake_duration_seconds: Histogram,
    /// Tool calls by response status.
    pub tool_calls_total: IntCounterVec,
    /// Gossip messages handed to the discovery pipeline.
    pub gossip_messages_total: IntCounter,
    pub gossip_publish_failures_total: IntCounter,
    pub active_sessions: IntGauge,
    pub known_peers: IntGauge,
    pub connected_peers: IntGauge,
}

impl NodeMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("lango".into()), None)?;

        let handshakes_total = IntCounterVec::new(
            Opts::new("handshakes_total", "Handshakes by role and outcome"),
            &["role", "outcome"],
        )?;
        registry.register(Box::new(handshakes_total.clone()))?;

        let handshake_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "handshake_duration_seconds",
                "Wall time of completed handshakes",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;
        registry.register(Box::new(handshake_duration_seconds.clone()))?;

        let tool_calls_total = IntCounterVec::new(
            Opts::new("tool_calls_total", "Inbound tool calls by response status"),
            &["status"],
        )?;
        registry.register(Box::new(tool_calls_total.clone()))?;

        let gossip_messages_total = IntCounter::new(
            "gossip_messages_total",
            "Gossip messages received on the card topic",
        )?;
        registry.register(Box::new(gossip_messages_total.clone()))?;

        let gossip_publish_failures_total = IntCounter::new(
            "gossip_publish_failures_total",
            "Card publishes the swarm refused",
        )?;
        registry.register(Box::new(gossip_publish_failures_total.clone()))?;

        let active_sessions = IntGauge::new("active_sessions", "Live handshake sessions")?;
        registry.register(Box::new(active_sessions.clone()))?;

        let known_peers = IntGauge::new("known_peers", "Cards in the peer directory")?;
        registry.register(Box::new(known_peers.clone()))?;

        let connected_peers = IntGauge::new("connected_peers", "Open libp2p connections")?;
        registry.register(Box::new(connected_peers.clone()))?;

        Ok(Self {
            registry,
            handshakes_total,
            handshake_duration_seconds,
            tool_calls_total,
            gossip_messages_total,
            gossip_publish_failures_total,
            active_sessions,
            known_peers,
            connected_peers,
        })
    }

    pub fn handshake(&self, role: &str, outcome: &str) {
        self.handshakes_total.with_label_values(&[role, outcome]).inc();
    }

    /// Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// `GET /metrics`
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
