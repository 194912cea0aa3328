//! Activity execution context

use uuid::Uuid;

/// Context provided to activities during execution
///
/// Identifies the owning workflow and the current execution attempt.
#[derive(Debug, Clone)]
pub struct ActivityContext {
    /// Current attempt number (1-based)
    pub attempt: u32,

    /// Maximum attempts allowed
    pub max_attempts: u32,

    /// Workflow instance ID that owns this activity
    pub workflow_id: Uuid,

    /// Activity ID within the workflow
    pub activity_id: String,
}

impl ActivityContext {
    /// Create a new activity context
    pub fn new(workflow_id: Uuid, activity_id: String, attempt: u32, max_attempts: u32) -> Self {
        Self {
            attempt,
            max_attempts,
            workflow_id,
            activity_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_context_creation() {
        let workflow_id = Uuid::now_v7();
        let ctx = ActivityContext::new(workflow_id, "check-status-1".to_string(), 1, 3);

        assert_eq!(ctx.workflow_id, workflow_id);
        assert_eq!(ctx.activity_id, "check-status-1");
        assert_eq!(ctx.attempt, 1);
        assert_eq!(ctx.max_attempts, 3);
    }
}
