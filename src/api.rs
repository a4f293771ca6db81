use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::batch::{run_batch, run_batch_with, BatchMode};
use crate::engine::AnalyticsEngine;
use crate::error::AnalyticsError;
use crate::model::Category;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AnalyticsEngine>,
    /// Used when a request does not carry its own window.
    pub window_days: i64,
    pub concurrency: usize,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/run_adaptive_analytics", post(run_all))
        .route("/generate_initial_insights", post(initialize_all))
        .route("/customers/{customer_id}/analyze", post(run_one))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct RunReq {
    #[serde(default)]
    window_days: Option<i64>,
}

#[derive(Serialize)]
struct CycleResp {
    customer_id: String,
    outcome: &'static str,
    applied: Vec<Category>,
}

async fn run_all(State(state): State<AppState>, body: Option<Json<RunReq>>) -> Response {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let window_days = req.window_days.unwrap_or(state.window_days);
    if window_days <= 0 {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("window_days must be positive, got {window_days}"),
        );
    }
    match run_batch(state.engine.clone(), window_days, state.concurrency).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn initialize_all(State(state): State<AppState>) -> Response {
    match run_batch_with(state.engine.clone(), BatchMode::Initialize, state.concurrency).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn run_one(
    State(state): State<AppState>,
    Path(customer_id): Path<String>,
    body: Option<Json<RunReq>>,
) -> Response {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let window_days = req.window_days.unwrap_or(state.window_days);
    match state.engine.run_analysis(&customer_id, window_days).await {
        Ok(outcome) => Json(CycleResp {
            outcome: outcome.label(),
            applied: outcome.applied().to_vec(),
            customer_id,
        })
        .into_response(),
        Err(e @ AnalyticsError::Validation(_)) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
