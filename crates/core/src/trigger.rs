//! One-shot follow-up action

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::http::{HttpClient, HttpRequest, RequestBody, TransportError};
use crate::request::PollRequest;

/// Longest response excerpt kept in a rejection
const BODY_EXCERPT_LIMIT: usize = 512;

/// Failures of the action call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    /// The call never produced a response
    #[error("action call failed: {0}")]
    Transport(#[from] TransportError),

    /// The action endpoint answered with a non-2xx status
    #[error("action endpoint rejected the call with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Confirmation that the action endpoint accepted the call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FireReceipt {
    /// HTTP status returned by the action endpoint
    pub status: u16,
}

/// Posts the request content to the action URL
#[derive(Clone)]
pub struct ActionTrigger {
    client: Arc<dyn HttpClient>,
}

impl ActionTrigger {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }

    /// POST the content once; any non-2xx final response is a failure
    pub async fn fire(&self, request: &PollRequest) -> Result<FireReceipt, TriggerError> {
        let response = self
            .client
            .send(HttpRequest::post(
                request.action_url.clone(),
                RequestBody::from_content(&request.content),
                request.transport.clone(),
            ))
            .await?;

        if !response.is_success() {
            return Err(TriggerError::Rejected {
                status: response.status,
                body: excerpt(&response.body),
            });
        }

        info!(url = %request.action_url, status = response.status, "action fired");
        Ok(FireReceipt {
            status: response.status,
        })
    }
}

fn excerpt(body: &str) -> String {
    match body.char_indices().nth(BODY_EXCERPT_LIMIT) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}
