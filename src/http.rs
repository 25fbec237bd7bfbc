//! HTTP surface: `POST /chat`, `GET /hotels`, `GET /health`. Grounded in
//! `mira-chat/src/server.rs`'s `AppState`/`create_router`/handler conventions.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, Method, StatusCode};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use crate::constants::HOTELS;
use crate::orchestrator::PipelineOrchestrator;
use crate::state::HistoryMessage;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PipelineOrchestrator>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub hotel: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryTurn>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub hotel: Option<String>,
    pub category: Option<String>,
    #[serde(rename = "evidencePassed")]
    pub evidence_passed: bool,
    pub sources: Vec<String>,
    pub score: f32,
}

#[derive(Debug, Serialize)]
pub struct HotelSummary {
    pub key: &'static str,
    pub name: &'static str,
    pub phone: &'static str,
}

/// Builds the axum router for the three HTTP routes, using the
/// `CorsLayer::new().allow_origin(Any)...` pattern and `.with_state(state)` wiring.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/chat", post(chat_handler))
        .route("/hotels", get(hotels_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    if req.query.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "query must not be empty".to_string()));
    }

    let history: Vec<HistoryMessage> = req
        .history
        .into_iter()
        .map(|turn| HistoryMessage { role: turn.role, content: turn.content })
        .collect();

    let outcome = state.orchestrator.handle(req.query, req.hotel, history, req.session_id).await;

    Ok(Json(ChatResponse {
        answer: outcome.answer,
        hotel: outcome.hotel,
        category: outcome.category,
        evidence_passed: outcome.evidence_passed,
        sources: outcome.sources,
        score: outcome.top_score,
    }))
}

async fn hotels_handler() -> Json<Vec<HotelSummary>> {
    Json(HOTELS.iter().map(|h| HotelSummary { key: h.key, name: h.name, phone: h.phone }).collect())
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok", "version": VERSION }))
}

/// Binds and serves the router, matching the `run(...)` boot shape in
/// `mira-chat/src/server.rs`.
pub async fn run(port: u16, state: AppState) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hotel_summary_count_matches_directory() {
        assert_eq!(HOTELS.len(), 5);
    }
}
