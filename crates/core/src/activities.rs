//! Durable activities performing the outbound calls
//!
//! Both activities take the full [`PollRequest`] as input. Their failures
//! are non-retryable: transport retries already happened inside the HTTP
//! client.

use std::sync::Arc;

use async_trait::async_trait;
use timekeeper_durable::prelude::{Activity, ActivityContext, ActivityError};
use tracing::warn;

use crate::http::HttpClient;
use crate::poller::{PollCheck, StatusPoller};
use crate::request::PollRequest;
use crate::trigger::{ActionTrigger, FireReceipt, TriggerError};

/// Error type reported when the status check cannot be completed
pub const TRANSPORT_ERROR: &str = "TRANSPORT_ERROR";

/// Error type reported when the action call fails
pub const TRIGGER_FAILED: &str = "TRIGGER_FAILED";

/// Runs one status check
pub struct CheckStatusActivity {
    poller: StatusPoller,
}

impl CheckStatusActivity {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            poller: StatusPoller::new(client),
        }
    }
}

#[async_trait]
impl Activity for CheckStatusActivity {
    const TYPE: &'static str = "check_status";
    type Input = PollRequest;
    type Output = PollCheck;

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        self.poller.check(&input).await.map_err(|e| {
            warn!(
                workflow_id = %ctx.workflow_id,
                activity_id = %ctx.activity_id,
                error = %e,
                "status check failed"
            );
            ActivityError::non_retryable(e.to_string()).with_type(TRANSPORT_ERROR)
        })
    }
}

/// Fires the follow-up action
pub struct FireActionActivity {
    trigger: ActionTrigger,
}

impl FireActionActivity {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            trigger: ActionTrigger::new(client),
        }
    }
}

#[async_trait]
impl Activity for FireActionActivity {
    const TYPE: &'static str = "fire_action";
    type Input = PollRequest;
    type Output = FireReceipt;

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        self.trigger.fire(&input).await.map_err(|e| {
            warn!(
                workflow_id = %ctx.workflow_id,
                activity_id = %ctx.activity_id,
                error = %e,
                "action call failed"
            );
            let error = ActivityError::non_retryable(e.to_string()).with_type(TRIGGER_FAILED);
            match e {
                TriggerError::Rejected { status, .. } => {
                    error.with_details(serde_json::json!({ "status": status }))
                }
                TriggerError::Transport(_) => error,
            }
        })
    }
}
