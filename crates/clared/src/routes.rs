//! API routes for clared
//!
//! The pipeline is synchronous (rusqlite plus blocking HTTP to the model),
//! so every handler that touches it runs under `spawn_blocking`.

use crate::server::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use clare_common::conversation::HistoryEntry;
use clare_common::{QueryOutcome, QueryRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

type AppStateArc = Arc<AppState>;

// ============================================================================
// Query Routes
// ============================================================================

pub fn query_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/query", post(submit_query))
}

async fn submit_query(
    State(state): State<AppStateArc>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryOutcome>, (StatusCode, String)> {
    let pipeline = state.pipeline.clone();
    let outcome = tokio::task::spawn_blocking(move || pipeline.submit_query(req))
        .await
        .map_err(|e| {
            error!("  Query task panicked: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;
    Ok(Json(outcome))
}

// ============================================================================
// Conversation Routes
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub conversation_id: String,
    pub entries: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub conversation_id: String,
    pub cleared: bool,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub turn_id: i64,
    pub is_helpful: bool,
    pub feedback: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub turn_id: i64,
    pub updated: bool,
}

pub fn conversation_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/conversation/:id/history", get(get_history))
        .route("/v1/conversation/:id", delete(clear_conversation))
        .route("/v1/feedback", post(submit_feedback))
}

async fn get_history(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, (StatusCode, String)> {
    let pipeline = state.pipeline.clone();
    let conversation_id = id.clone();
    let entries = tokio::task::spawn_blocking(move || pipeline.get_history(&conversation_id))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(HistoryResponse {
        conversation_id: id,
        entries,
    }))
}

async fn clear_conversation(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
) -> Result<Json<ClearResponse>, (StatusCode, String)> {
    let pipeline = state.pipeline.clone();
    let conversation_id = id.clone();
    let cleared =
        tokio::task::spawn_blocking(move || pipeline.clear_conversation(&conversation_id))
            .await
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(ClearResponse {
        conversation_id: id,
        cleared,
    }))
}

async fn submit_feedback(
    State(state): State<AppStateArc>,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<FeedbackResponse>, (StatusCode, String)> {
    let pipeline = state.pipeline.clone();
    let turn_id = req.turn_id;
    let updated = tokio::task::spawn_blocking(move || {
        pipeline.submit_feedback(req.turn_id, req.is_helpful, req.feedback.as_deref())
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(FeedbackResponse { turn_id, updated }))
}

// ============================================================================
// Health Routes
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/health", get(health_check))
}

async fn health_check(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}
