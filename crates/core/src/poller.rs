//! Status checks and response classification

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http::{HttpClient, HttpRequest, TransportError};
use crate::request::{PollMode, PollRequest};

/// What the orchestrator should do after a status check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollOutcome {
    /// Not ready yet; wait and check again
    KeepPolling,

    /// Ready; fire the action and finish
    TriggerAndStop,

    /// Unexpected response; finish without firing
    Stop,
}

/// Result of one status check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollCheck {
    pub outcome: PollOutcome,

    /// HTTP status observed
    pub status: u16,

    /// Human-readable reason for the classification
    pub detail: String,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    #[serde(rename = "runtimeStatus", alias = "RuntimeStatus")]
    runtime_status: String,
}

/// Classify a status-check response
pub fn classify(mode: PollMode, status: u16, body: &str) -> PollCheck {
    let (outcome, detail) = match (mode, status) {
        (_, 202) => (PollOutcome::KeepPolling, "accepted, still pending".to_string()),
        (PollMode::RawCheck, 200) => (PollOutcome::TriggerAndStop, "ready".to_string()),
        (PollMode::StatusAware, 200) => match serde_json::from_str::<StatusBody>(body) {
            Ok(parsed) => match parsed.runtime_status.as_str() {
                "Running" => (PollOutcome::TriggerAndStop, "runtimeStatus Running".to_string()),
                "Pending" => (PollOutcome::KeepPolling, "runtimeStatus Pending".to_string()),
                other => (
                    PollOutcome::Stop,
                    format!("unexpected runtimeStatus '{other}'"),
                ),
            },
            Err(e) => (PollOutcome::Stop, format!("unreadable status body: {e}")),
        },
        (_, other) => (PollOutcome::Stop, format!("unexpected status code {other}")),
    };

    PollCheck {
        outcome,
        status,
        detail,
    }
}

/// Issues one logical status check per call
#[derive(Clone)]
pub struct StatusPoller {
    client: Arc<dyn HttpClient>,
}

impl StatusPoller {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }

    /// GET the status URL and classify the final response
    pub async fn check(&self, request: &PollRequest) -> Result<PollCheck, TransportError> {
        let response = self
            .client
            .send(HttpRequest::get(
                request.status_check_url.clone(),
                request.transport.clone(),
            ))
            .await?;

        let check = classify(request.mode, response.status, &response.body);
        debug!(
            url = %request.status_check_url,
            mode = %request.mode,
            status = check.status,
            outcome = ?check.outcome,
            detail = %check.detail,
            "status checked"
        );
        Ok(check)
    }
}
