//! Workflow trait definition

use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use super::WorkflowAction;
use crate::activity::ActivityError;

/// Error type for workflow failures
#[derive(Debug, Clone, Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct WorkflowError {
    /// Error message
    pub message: String,

    /// Error code for programmatic handling
    pub code: Option<String>,
}

impl WorkflowError {
    /// Create a new workflow error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Set the error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl std::fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{}: {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for WorkflowError {}

/// Execution context handed to every workflow callback
///
/// Workflows must not read the wall clock or perform I/O. The context only
/// exposes information that is identical on every replay, plus a flag telling
/// whether the callback is re-applying history. Use the flag to keep log
/// output replay-safe.
#[derive(Debug, Clone, Copy)]
pub struct WorkflowContext {
    workflow_id: Uuid,
    replaying: bool,
}

impl WorkflowContext {
    /// Create a context for a live (non-replay) callback
    pub fn new(workflow_id: Uuid) -> Self {
        Self {
            workflow_id,
            replaying: false,
        }
    }

    /// Create a context for a callback re-applying recorded history
    pub fn replaying(workflow_id: Uuid) -> Self {
        Self {
            workflow_id,
            replaying: true,
        }
    }

    /// ID of the workflow instance
    pub fn workflow_id(&self) -> Uuid {
        self.workflow_id
    }

    /// Whether the callback is re-applying recorded history
    pub fn is_replaying(&self) -> bool {
        self.replaying
    }
}

/// A workflow is a deterministic state machine driven by events
///
/// Workflows are the core abstraction for durable execution. They define:
/// - How to start execution (`on_start`)
/// - How to handle activity completions (`on_activity_completed`, `on_activity_failed`)
/// - How to resume after a durable timer (`on_timer_fired`)
///
/// # Determinism
///
/// Workflows must be deterministic - given the same sequence of events, they must
/// produce the same sequence of actions. The executor replays the full event log
/// on every step and rejects a workflow whose replayed actions diverge from the
/// recorded ones.
///
/// # Example
///
/// ```ignore
/// use timekeeper_durable::prelude::*;
///
/// impl Workflow for OrderWorkflow {
///     const TYPE: &'static str = "order_workflow";
///     type Input = OrderInput;
///     type Output = OrderResult;
///
///     fn new(input: Self::Input) -> Self {
///         Self { state: OrderState::Created, order_id: input.order_id }
///     }
///
///     fn on_start(&mut self, _ctx: &WorkflowContext) -> Vec<WorkflowAction> {
///         vec![WorkflowAction::schedule_activity(
///             "validate",
///             "validate_order",
///             json!({ "order_id": self.order_id }),
///         )]
///     }
///
///     // ... implement other methods
/// }
/// ```
pub trait Workflow: Send + Sync + 'static {
    /// Unique type identifier for this workflow
    ///
    /// This is used to look up the workflow in the registry during replay.
    const TYPE: &'static str;

    /// Input type for starting the workflow
    type Input: Serialize + DeserializeOwned + Send + Clone;

    /// Output type when workflow completes successfully
    type Output: Serialize + DeserializeOwned + Send;

    /// Create a new workflow instance from input
    ///
    /// This is called both when starting a new workflow and when replaying.
    fn new(input: Self::Input) -> Self;

    /// Called when workflow starts (or replays from beginning)
    fn on_start(&mut self, ctx: &WorkflowContext) -> Vec<WorkflowAction>;

    /// Called when an activity completes successfully
    ///
    /// The result is the JSON value returned by the activity.
    fn on_activity_completed(
        &mut self,
        ctx: &WorkflowContext,
        activity_id: &str,
        result: serde_json::Value,
    ) -> Vec<WorkflowAction>;

    /// Called when an activity fails (after all retries exhausted)
    fn on_activity_failed(
        &mut self,
        ctx: &WorkflowContext,
        activity_id: &str,
        error: &ActivityError,
    ) -> Vec<WorkflowAction>;

    /// Called when a durable timer fires
    fn on_timer_fired(&mut self, ctx: &WorkflowContext, timer_id: &str) -> Vec<WorkflowAction> {
        let _ = (ctx, timer_id);
        vec![]
    }

    /// Check if workflow has reached a terminal state
    fn is_completed(&self) -> bool;

    /// Get the workflow result (if completed successfully)
    fn result(&self) -> Option<Self::Output>;

    /// Get the workflow error (if failed)
    fn error(&self) -> Option<WorkflowError> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_error_display() {
        let error = WorkflowError::new("something went wrong");
        assert_eq!(error.to_string(), "something went wrong");
    }

    #[test]
    fn test_workflow_error_with_code() {
        let error = WorkflowError::new("not found").with_code("NOT_FOUND");
        assert_eq!(error.code, Some("NOT_FOUND".to_string()));
        assert_eq!(error.to_string(), "NOT_FOUND: not found");
    }

    #[test]
    fn test_context_flags() {
        let id = Uuid::now_v7();
        assert!(!WorkflowContext::new(id).is_replaying());
        assert!(WorkflowContext::replaying(id).is_replaying());
        assert_eq!(WorkflowContext::new(id).workflow_id(), id);
    }
}
