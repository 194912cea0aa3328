//! In-memory implementation of WorkflowEventStore

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;
use crate::workflow::{WorkflowError, WorkflowEvent};

/// Internal workflow state
struct WorkflowState {
    workflow_type: String,
    status: WorkflowStatus,
    input: serde_json::Value,
    result: Option<serde_json::Value>,
    error: Option<WorkflowError>,
    events: Vec<WorkflowEvent>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Internal task state
struct TaskState {
    definition: TaskDefinition,
    status: TaskStatus,
    attempt: u32,
    not_before: Option<DateTime<Utc>>,
    error_history: Vec<String>,
}

/// Internal timer state
struct TimerState {
    workflow_id: Uuid,
    timer_id: String,
    fire_at: DateTime<Utc>,
}

/// In-memory implementation of WorkflowEventStore
///
/// Stores all data behind `parking_lot` locks. State does not survive a
/// process restart.
///
/// # Example
///
/// ```
/// use timekeeper_durable::InMemoryWorkflowEventStore;
///
/// let store = InMemoryWorkflowEventStore::new();
/// assert_eq!(store.workflow_count(), 0);
/// ```
pub struct InMemoryWorkflowEventStore {
    workflows: RwLock<HashMap<Uuid, WorkflowState>>,
    tasks: RwLock<HashMap<Uuid, TaskState>>,
    timers: RwLock<Vec<TimerState>>,
}

impl InMemoryWorkflowEventStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
            timers: RwLock::new(Vec::new()),
        }
    }

    /// Get the number of workflows
    pub fn workflow_count(&self) -> usize {
        self.workflows.read().len()
    }

    /// Get the number of pending tasks
    pub fn pending_task_count(&self) -> usize {
        self.tasks
            .read()
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .count()
    }

    /// Get the number of timers that have not fired yet
    pub fn pending_timer_count(&self) -> usize {
        self.timers.read().len()
    }

    /// Errors recorded for a task across its attempts
    pub fn task_errors(&self, task_id: Uuid) -> Vec<String> {
        self.tasks
            .read()
            .get(&task_id)
            .map(|t| t.error_history.clone())
            .unwrap_or_default()
    }

    /// Clear all data
    pub fn clear(&self) {
        self.workflows.write().clear();
        self.tasks.write().clear();
        self.timers.write().clear();
    }
}

impl Default for InMemoryWorkflowEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowEventStore for InMemoryWorkflowEventStore {
    async fn create_workflow(
        &self,
        workflow_id: Uuid,
        workflow_type: &str,
        input: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write();
        if workflows.contains_key(&workflow_id) {
            return Err(StoreError::WorkflowExists(workflow_id));
        }

        let now = Utc::now();
        workflows.insert(
            workflow_id,
            WorkflowState {
                workflow_type: workflow_type.to_string(),
                status: WorkflowStatus::Pending,
                input,
                result: None,
                error: None,
                events: vec![],
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn get_workflow_status(&self, workflow_id: Uuid) -> Result<WorkflowStatus, StoreError> {
        let workflows = self.workflows.read();
        workflows
            .get(&workflow_id)
            .map(|w| w.status)
            .ok_or(StoreError::WorkflowNotFound(workflow_id))
    }

    async fn get_workflow_info(&self, workflow_id: Uuid) -> Result<WorkflowInfo, StoreError> {
        let workflows = self.workflows.read();
        let workflow = workflows
            .get(&workflow_id)
            .ok_or(StoreError::WorkflowNotFound(workflow_id))?;

        Ok(WorkflowInfo {
            id: workflow_id,
            workflow_type: workflow.workflow_type.clone(),
            status: workflow.status,
            input: workflow.input.clone(),
            result: workflow.result.clone(),
            error: workflow.error.clone(),
            created_at: workflow.created_at,
            updated_at: workflow.updated_at,
        })
    }

    async fn append_events(
        &self,
        workflow_id: Uuid,
        expected_sequence: i32,
        events: Vec<WorkflowEvent>,
    ) -> Result<i32, StoreError> {
        let mut workflows = self.workflows.write();
        let workflow = workflows
            .get_mut(&workflow_id)
            .ok_or(StoreError::WorkflowNotFound(workflow_id))?;

        let current_sequence = workflow.events.len() as i32;
        if current_sequence != expected_sequence {
            return Err(StoreError::ConcurrencyConflict {
                expected: expected_sequence,
                actual: current_sequence,
            });
        }

        workflow.events.extend(events);
        workflow.updated_at = Utc::now();
        Ok(workflow.events.len() as i32)
    }

    async fn load_events(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<(i32, WorkflowEvent)>, StoreError> {
        let workflows = self.workflows.read();
        let workflow = workflows
            .get(&workflow_id)
            .ok_or(StoreError::WorkflowNotFound(workflow_id))?;

        Ok(workflow
            .events
            .iter()
            .enumerate()
            .map(|(i, e)| (i as i32, e.clone()))
            .collect())
    }

    async fn update_workflow_status(
        &self,
        workflow_id: Uuid,
        status: WorkflowStatus,
        result: Option<serde_json::Value>,
        error: Option<WorkflowError>,
    ) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write();
        let workflow = workflows
            .get_mut(&workflow_id)
            .ok_or(StoreError::WorkflowNotFound(workflow_id))?;

        workflow.status = status;
        workflow.result = result;
        workflow.error = error;
        workflow.updated_at = Utc::now();
        Ok(())
    }

    async fn enqueue_task(&self, task: TaskDefinition) -> Result<Uuid, StoreError> {
        let task_id = Uuid::now_v7();
        let mut tasks = self.tasks.write();
        tasks.insert(
            task_id,
            TaskState {
                definition: task,
                status: TaskStatus::Pending,
                attempt: 0,
                not_before: None,
                error_history: vec![],
            },
        );
        Ok(task_id)
    }

    async fn claim_task(
        &self,
        worker_id: &str,
        activity_types: &[String],
        max_tasks: usize,
    ) -> Result<Vec<ClaimedTask>, StoreError> {
        let now = Utc::now();
        let mut tasks = self.tasks.write();

        let mut candidates: Vec<(i32, Uuid)> = tasks
            .iter()
            .filter(|(_, t)| {
                t.status == TaskStatus::Pending
                    && t.not_before.map_or(true, |nb| nb <= now)
                    && activity_types.contains(&t.definition.activity_type)
            })
            .map(|(id, t)| (t.definition.options.priority, *id))
            .collect();
        // UUIDv7 ids sort by creation time
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut claimed = Vec::with_capacity(candidates.len().min(max_tasks));
        for (_, task_id) in candidates.into_iter().take(max_tasks) {
            let Some(task) = tasks.get_mut(&task_id) else {
                continue;
            };
            task.status = TaskStatus::Claimed;
            task.attempt += 1;

            claimed.push(ClaimedTask {
                id: task_id,
                workflow_id: task.definition.workflow_id,
                activity_id: task.definition.activity_id.clone(),
                activity_type: task.definition.activity_type.clone(),
                input: task.definition.input.clone(),
                options: task.definition.options.clone(),
                attempt: task.attempt,
                max_attempts: task.definition.options.retry_policy.max_attempts,
            });
        }

        if !claimed.is_empty() {
            tracing::trace!(worker_id, count = claimed.len(), "claimed tasks");
        }
        Ok(claimed)
    }

    async fn complete_task(&self, task_id: Uuid) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;

        task.status = TaskStatus::Completed;
        Ok(())
    }

    async fn fail_task(
        &self,
        task_id: Uuid,
        error: &str,
        retryable: bool,
    ) -> Result<TaskFailureOutcome, StoreError> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;

        task.error_history.push(error.to_string());

        let policy = &task.definition.options.retry_policy;
        if retryable && policy.has_attempts_remaining(task.attempt) {
            let next_attempt = task.attempt + 1;
            let delay = policy.delay_for_attempt(next_attempt);
            task.status = TaskStatus::Pending;
            task.not_before = chrono::Duration::from_std(delay)
                .ok()
                .and_then(|d| Utc::now().checked_add_signed(d));

            Ok(TaskFailureOutcome::WillRetry {
                next_attempt,
                delay,
            })
        } else {
            task.status = TaskStatus::Failed;
            Ok(TaskFailureOutcome::Exhausted)
        }
    }

    async fn schedule_timer(
        &self,
        workflow_id: Uuid,
        timer_id: &str,
        fire_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut timers = self.timers.write();
        timers.retain(|t| !(t.workflow_id == workflow_id && t.timer_id == timer_id));
        timers.push(TimerState {
            workflow_id,
            timer_id: timer_id.to_string(),
            fire_at,
        });
        Ok(())
    }

    async fn claim_due_timers(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DueTimer>, StoreError> {
        let mut timers = self.timers.write();
        timers.sort_by(|a, b| a.fire_at.cmp(&b.fire_at));

        let due = timers
            .iter()
            .take_while(|t| t.fire_at <= now)
            .take(limit)
            .count();

        Ok(timers
            .drain(..due)
            .map(|t| DueTimer {
                workflow_id: t.workflow_id,
                timer_id: t.timer_id,
                fire_at: t.fire_at,
            })
            .collect())
    }

    async fn cancel_timers(&self, workflow_id: Uuid) -> Result<usize, StoreError> {
        let mut timers = self.timers.write();
        let before = timers.len();
        timers.retain(|t| t.workflow_id != workflow_id);
        Ok(before - timers.len())
    }
}
