//! HTTP-Endpunkte des Nodes
//!
//! - `GET /health` – Status, Version, Uptime, Speicher, Worker-Anzahl
//! - `GET /stats` – derselbe `StatsData` wie im 5-Sekunden-Broadcast
//!
//! Beide liegen auf dem separaten HTTP-Port; ein Origin-Check findet
//! nicht statt (Auth zwischen Controller und Node ist kein Ziel).

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use crate::server_state::NodeState;

/// Antwort des Health-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthAntwort {
    pub status: String,
    pub version: String,
    pub uptime_ms: u64,
    pub memory_mb: u64,
    pub num_workers: usize,
}

/// Axum-Router fuer `/health` und `/stats`
pub fn http_router(state: Arc<NodeState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

/// `GET /health`
async fn health_handler(State(state): State<Arc<NodeState>>) -> Json<HealthAntwort> {
    let stats = state.stats_daten();
    Json(HealthAntwort {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_ms: state.uptime_ms(),
        memory_mb: stats.memory_used / (1024 * 1024),
        num_workers: std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
    })
}

/// `GET /stats`
async fn stats_handler(
    State(state): State<Arc<NodeState>>,
) -> Json<linkdave_protocol::StatsData> {
    Json(state.stats_daten())
}
