// Poll run HTTP routes
//
// Starting a run answers 202 with links to query and terminate it, so callers
// can follow the run without knowing the URL layout.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use timekeeper_core::{PollingService, RunStatus, ServiceError, ValidationError};
use timekeeper_durable::prelude::InMemoryWorkflowEventStore;
use uuid::Uuid;

use super::common::ApiError;

/// App state for timer routes
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PollingService<InMemoryWorkflowEventStore>>,
    pub public_base_url: String,
}

impl AppState {
    pub fn new(
        service: Arc<PollingService<InMemoryWorkflowEventStore>>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            service,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn status_uri(&self, id: Uuid) -> String {
        format!("{}/api/v1/timers/{}", self.public_base_url, id)
    }

    fn terminate_uri(&self, id: Uuid) -> String {
        format!("{}/api/v1/timers/{}/terminate", self.public_base_url, id)
    }
}

/// Links returned when a run is accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckStatusResponse {
    pub id: Uuid,
    pub status_query_get_uri: String,
    pub terminate_post_uri: String,
}

#[derive(Debug, Deserialize)]
pub struct TerminateQuery {
    pub reason: Option<String>,
}

/// Create timer routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/timers", post(create_timer))
        .route("/api/v1/timers/:id", get(get_timer))
        .route("/api/v1/timers/:id/terminate", post(terminate_timer))
        .with_state(state)
}

/// POST /api/v1/timers - Start a poll run
pub async fn create_timer(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let value: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
        ServiceError::Validation(ValidationError::Malformed(format!("invalid JSON: {}", e)))
    })?;

    let id = state.service.start_json(value).await?;
    tracing::info!(%id, "started poll run");

    let response = CheckStatusResponse {
        id,
        status_query_get_uri: state.status_uri(id),
        terminate_post_uri: state.terminate_uri(id),
    };
    Ok((
        StatusCode::ACCEPTED,
        [(header::LOCATION, response.status_query_get_uri.clone())],
        Json(response),
    )
        .into_response())
}

/// GET /api/v1/timers/:id - Run status
pub async fn get_timer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunStatus>, ApiError> {
    Ok(Json(state.service.status(id).await?))
}

/// POST /api/v1/timers/:id/terminate - Cancel a run between attempts
pub async fn terminate_timer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<TerminateQuery>,
) -> Result<StatusCode, ApiError> {
    let reason = query
        .reason
        .unwrap_or_else(|| "terminated via API".to_string());
    state.service.cancel(id, &reason).await?;
    tracing::info!(%id, %reason, "terminated poll run");
    Ok(StatusCode::ACCEPTED)
}
