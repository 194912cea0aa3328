// Public HTTP API

pub mod common;
pub mod timers;

use axum::{routing::get, Json, Router};
use serde::Serialize;

pub use common::{ApiError, ErrorResponse};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Health check routes
pub fn health_routes() -> Router {
    Router::new().route("/health", get(health))
}
