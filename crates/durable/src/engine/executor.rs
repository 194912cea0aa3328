//! Workflow executor with replay support
//!
//! The `WorkflowExecutor` is responsible for:
//! - Starting new workflows
//! - Replaying workflows from event history and checking determinism
//! - Processing workflow actions (scheduling activities, durable timers, completion)
//! - Delivering activity results and timer firings
//! - Cancelling workflows that are suspended

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::activity::ActivityError;
use crate::persistence::{
    StoreError, TaskDefinition, WorkflowEventStore, WorkflowInfo, WorkflowStatus,
};
use crate::workflow::{Workflow, WorkflowAction, WorkflowContext, WorkflowError, WorkflowEvent};

use super::registry::{AnyWorkflow, RegistryError, WorkflowRegistry};

/// Error code of a workflow failed for reaching `max_events_per_workflow`
pub const EVENT_LIMIT_EXCEEDED: &str = "EVENT_LIMIT_EXCEEDED";

/// Configuration for the workflow executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum events per workflow
    ///
    /// The last slot is reserved for the terminal event, so a workflow that
    /// runs out of room ends `Failed` with [`EVENT_LIMIT_EXCEEDED`].
    pub max_events_per_workflow: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_events_per_workflow: 10000,
        }
    }
}

/// Errors from executor operations
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Registry error
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Workflow already reached a terminal state
    #[error("workflow {0} already completed")]
    WorkflowCompleted(Uuid),

    /// Workflow not found
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    /// An activity is outstanding, so the workflow is not at a suspension point
    #[error("workflow {workflow_id} has activity {activity_id} in flight")]
    ActivityInFlight {
        workflow_id: Uuid,
        activity_id: String,
    },

    /// Timer was never started by the workflow
    #[error("workflow {workflow_id} has no timer {timer_id}")]
    UnknownTimer { workflow_id: Uuid, timer_id: String },

    /// Activity was never scheduled by the workflow
    #[error("workflow {workflow_id} has no activity {activity_id}")]
    UnknownActivity {
        workflow_id: Uuid,
        activity_id: String,
    },

    /// Replay error (non-determinism detected)
    #[error("replay error: {0}")]
    ReplayError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ExecutorError {
    /// Whether retrying the same call later can succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::Backend(_) | StoreError::ConcurrencyConflict { .. })
        )
    }
}

/// Result of processing a workflow
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessResult {
    /// Whether the workflow is in a terminal state
    pub completed: bool,

    /// Number of new events written
    pub events_written: usize,

    /// Number of tasks enqueued
    pub tasks_enqueued: usize,

    /// Number of durable timers scheduled
    pub timers_scheduled: usize,
}

impl ProcessResult {
    fn terminal() -> Self {
        Self {
            completed: true,
            ..Self::default()
        }
    }
}

/// Workflow executor
///
/// The executor drives workflow state machines by replaying events and
/// processing actions. Every state transition replays the full history,
/// checks that recorded commands are produced again, then persists the
/// commands that follow from the newest input.
///
/// # Example
///
/// ```ignore
/// use timekeeper_durable::prelude::*;
///
/// let store = InMemoryWorkflowEventStore::new();
/// let mut executor = WorkflowExecutor::new(store);
/// executor.register::<MyWorkflow>();
///
/// // Start a new workflow
/// let workflow_id = executor.start_workflow::<MyWorkflow>(input).await?;
///
/// // Resume it once its timer is due
/// executor.on_timer_fired(workflow_id, "wait").await?;
/// ```
pub struct WorkflowExecutor<S: WorkflowEventStore> {
    store: Arc<S>,
    registry: WorkflowRegistry,
    config: ExecutorConfig,
    /// Serializes state transitions within this process
    step_lock: Mutex<()>,
}

impl<S: WorkflowEventStore> WorkflowExecutor<S> {
    /// Create a new executor with the given store
    pub fn new(store: S) -> Self {
        Self::with_config(store, ExecutorConfig::default())
    }

    /// Create a new executor with custom config
    pub fn with_config(store: S, config: ExecutorConfig) -> Self {
        Self::from_shared(Arc::new(store), config)
    }

    /// Create an executor over a store that is shared with other components
    pub fn from_shared(store: Arc<S>, config: ExecutorConfig) -> Self {
        Self {
            store,
            registry: WorkflowRegistry::new(),
            config,
            step_lock: Mutex::new(()),
        }
    }

    /// Register a workflow type
    pub fn register<W: Workflow>(&mut self) {
        self.registry.register::<W>();
        info!(workflow_type = W::TYPE, "registered workflow type");
    }

    /// Executor limits
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Get a reference to the store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get a shared handle to the store
    pub fn shared_store(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    /// Start a new workflow
    ///
    /// Creates the workflow instance, persists the start event, and
    /// processes initial actions.
    #[instrument(skip(self, input), fields(workflow_type = W::TYPE))]
    pub async fn start_workflow<W: Workflow>(&self, input: W::Input) -> Result<Uuid, ExecutorError> {
        if !self.registry.contains(W::TYPE) {
            return Err(RegistryError::UnknownWorkflowType(W::TYPE.to_string()).into());
        }

        let workflow_id = Uuid::now_v7();
        let input_json = serde_json::to_value(&input)?;

        info!(%workflow_id, "starting new workflow");

        let _guard = self.step_lock.lock().await;
        self.store
            .create_workflow(workflow_id, W::TYPE, input_json.clone())
            .await?;
        self.store
            .update_workflow_status(workflow_id, WorkflowStatus::Running, None, None)
            .await?;

        self.advance(
            workflow_id,
            W::TYPE,
            input_json.clone(),
            Vec::new(),
            Some(WorkflowEvent::WorkflowStarted { input: input_json }),
        )
        .await?;

        Ok(workflow_id)
    }

    /// Re-run a workflow from its history and persist any actions that were
    /// decided but not yet recorded
    #[instrument(skip(self))]
    pub async fn process_workflow(&self, workflow_id: Uuid) -> Result<ProcessResult, ExecutorError> {
        let _guard = self.step_lock.lock().await;
        self.step(workflow_id, None).await
    }

    /// Handle activity completion
    ///
    /// Called by the worker pool when an activity completes successfully.
    #[instrument(skip(self, result))]
    pub async fn on_activity_completed(
        &self,
        workflow_id: Uuid,
        activity_id: &str,
        result: serde_json::Value,
    ) -> Result<ProcessResult, ExecutorError> {
        self.deliver(
            workflow_id,
            WorkflowEvent::ActivityCompleted {
                activity_id: activity_id.to_string(),
                result,
            },
        )
        .await
    }

    /// Handle activity failure
    ///
    /// Called by the worker pool when an activity fails. A failure that will be
    /// retried is recorded but not delivered to the workflow.
    #[instrument(skip(self, error))]
    pub async fn on_activity_failed(
        &self,
        workflow_id: Uuid,
        activity_id: &str,
        error: ActivityError,
        will_retry: bool,
    ) -> Result<ProcessResult, ExecutorError> {
        self.deliver(
            workflow_id,
            WorkflowEvent::ActivityFailed {
                activity_id: activity_id.to_string(),
                error,
                will_retry,
            },
        )
        .await
    }

    /// Handle a durable timer reaching its deadline
    ///
    /// Firing is idempotent: a timer that already fired, or a timer of a
    /// terminal workflow, is ignored.
    #[instrument(skip(self))]
    pub async fn on_timer_fired(
        &self,
        workflow_id: Uuid,
        timer_id: &str,
    ) -> Result<ProcessResult, ExecutorError> {
        self.deliver(
            workflow_id,
            WorkflowEvent::TimerFired {
                timer_id: timer_id.to_string(),
            },
        )
        .await
    }

    /// Deliver an input event (timer firing or activity outcome)
    ///
    /// Duplicates are ignored; events of terminal workflows are dropped.
    pub async fn deliver(
        &self,
        workflow_id: Uuid,
        event: WorkflowEvent,
    ) -> Result<ProcessResult, ExecutorError> {
        let _guard = self.step_lock.lock().await;
        self.step(workflow_id, Some(event)).await
    }

    /// Fail a running workflow from outside its own logic
    ///
    /// Used when an input can never be delivered. Pending timers are dropped.
    /// A workflow that is already terminal is left as it is.
    #[instrument(skip(self, error))]
    pub async fn fail_workflow(
        &self,
        workflow_id: Uuid,
        error: WorkflowError,
    ) -> Result<ProcessResult, ExecutorError> {
        let _guard = self.step_lock.lock().await;

        let status = self.store.get_workflow_status(workflow_id).await?;
        if status.is_terminal() {
            return Ok(ProcessResult::terminal());
        }
        let recorded = self.store.load_events(workflow_id).await?.len();
        self.record_failure(workflow_id, recorded, error).await
    }

    /// Cancel a workflow that is waiting on a durable timer
    ///
    /// Cancellation is refused while an activity is outstanding, and for
    /// workflows that already reached a terminal state.
    #[instrument(skip(self, reason))]
    pub async fn cancel_workflow(
        &self,
        workflow_id: Uuid,
        reason: impl Into<String>,
    ) -> Result<(), ExecutorError> {
        let _guard = self.step_lock.lock().await;

        let status = self.store.get_workflow_status(workflow_id).await?;
        if status.is_terminal() {
            warn!(%workflow_id, %status, "cannot cancel workflow in terminal state");
            return Err(ExecutorError::WorkflowCompleted(workflow_id));
        }

        let events: Vec<WorkflowEvent> = self
            .store
            .load_events(workflow_id)
            .await?
            .into_iter()
            .map(|(_, e)| e)
            .collect();

        if let Some(activity_id) = outstanding_activity(&events) {
            return Err(ExecutorError::ActivityInFlight {
                workflow_id,
                activity_id,
            });
        }

        let reason = reason.into();
        self.store
            .append_events(
                workflow_id,
                events.len() as i32,
                vec![WorkflowEvent::WorkflowCancelled {
                    reason: reason.clone(),
                }],
            )
            .await?;
        self.store
            .update_workflow_status(workflow_id, WorkflowStatus::Cancelled, None, None)
            .await?;
        let dropped = self.store.cancel_timers(workflow_id).await?;

        info!(%workflow_id, %reason, timers_dropped = dropped, "workflow cancelled");
        Ok(())
    }

    /// Get the stored view of a workflow
    pub async fn workflow_info(&self, workflow_id: Uuid) -> Result<WorkflowInfo, ExecutorError> {
        Ok(self.store.get_workflow_info(workflow_id).await?)
    }

    /// Load the recorded history of a workflow
    pub async fn history(&self, workflow_id: Uuid) -> Result<Vec<WorkflowEvent>, ExecutorError> {
        Ok(self
            .store
            .load_events(workflow_id)
            .await?
            .into_iter()
            .map(|(_, e)| e)
            .collect())
    }

    // =========================================================================
    // Internal Methods
    // =========================================================================

    /// Deliver one input event (or none) to an existing workflow
    ///
    /// Must be called with `step_lock` held.
    async fn step(
        &self,
        workflow_id: Uuid,
        input_event: Option<WorkflowEvent>,
    ) -> Result<ProcessResult, ExecutorError> {
        let info = self.store.get_workflow_info(workflow_id).await?;
        if info.status.is_terminal() {
            debug!(%workflow_id, status = %info.status, "workflow already in terminal state");
            return Ok(ProcessResult::terminal());
        }

        let events: Vec<WorkflowEvent> = self
            .store
            .load_events(workflow_id)
            .await?
            .into_iter()
            .map(|(_, e)| e)
            .collect();

        if events.is_empty() {
            return Err(ExecutorError::WorkflowNotFound(workflow_id));
        }

        let input_event = match input_event {
            Some(event) => {
                if !self.accepts(workflow_id, &events, &event)? {
                    return Ok(ProcessResult::default());
                }
                Some(event)
            }
            None => None,
        };

        self.advance(
            workflow_id,
            &info.workflow_type,
            info.input,
            events,
            input_event,
        )
        .await
    }

    /// Check whether an input event is new for this workflow
    ///
    /// Returns `Ok(false)` for duplicates.
    fn accepts(
        &self,
        workflow_id: Uuid,
        events: &[WorkflowEvent],
        event: &WorkflowEvent,
    ) -> Result<bool, ExecutorError> {
        match event {
            WorkflowEvent::TimerFired { timer_id } => {
                let started = events.iter().any(|e| {
                    matches!(e, WorkflowEvent::TimerStarted { timer_id: t, .. } if t == timer_id)
                });
                if !started {
                    return Err(ExecutorError::UnknownTimer {
                        workflow_id,
                        timer_id: timer_id.clone(),
                    });
                }
                let fired = events.iter().any(
                    |e| matches!(e, WorkflowEvent::TimerFired { timer_id: t } if t == timer_id),
                );
                if fired {
                    debug!(%workflow_id, %timer_id, "ignoring duplicate timer firing");
                }
                Ok(!fired)
            }
            WorkflowEvent::ActivityCompleted { activity_id, .. }
            | WorkflowEvent::ActivityFailed { activity_id, .. } => {
                let scheduled = events.iter().any(|e| {
                    matches!(e, WorkflowEvent::ActivityScheduled { activity_id: a, .. } if a == activity_id)
                });
                if !scheduled {
                    return Err(ExecutorError::UnknownActivity {
                        workflow_id,
                        activity_id: activity_id.clone(),
                    });
                }
                let resolved = events
                    .iter()
                    .any(|e| resolves_activity(e) && e.activity_id() == Some(activity_id.as_str()));
                if resolved {
                    debug!(%workflow_id, %activity_id, "ignoring duplicate activity outcome");
                }
                Ok(!resolved)
            }
            other => Err(ExecutorError::ReplayError(format!(
                "{} cannot be delivered to a running workflow",
                other.kind()
            ))),
        }
    }

    /// Replay `history`, append `input_event`, verify recorded commands, and
    /// persist the actions that follow
    ///
    /// Must be called with `step_lock` held.
    async fn advance(
        &self,
        workflow_id: Uuid,
        workflow_type: &str,
        input: serde_json::Value,
        mut history: Vec<WorkflowEvent>,
        input_event: Option<WorkflowEvent>,
    ) -> Result<ProcessResult, ExecutorError> {
        let mut result = ProcessResult::default();
        let live_from = history.len();

        // The start event is always admitted; anything later must leave room
        // for a terminal event
        let incoming = usize::from(input_event.is_some());
        if live_from > 0 && !self.has_room(live_from + incoming) {
            return self.fail_over_limit(workflow_id, live_from).await;
        }

        if let Some(event) = input_event {
            self.store
                .append_events(workflow_id, live_from as i32, vec![event.clone()])
                .await?;
            history.push(event);
            result.events_written += 1;
        }

        if !matches!(history.first(), Some(WorkflowEvent::WorkflowStarted { .. })) {
            return Err(ExecutorError::ReplayError(
                "first event must be WorkflowStarted".to_string(),
            ));
        }

        let mut workflow = self.registry.create(workflow_type, input)?;
        let pending = replay(&mut *workflow, workflow_id, &history, live_from)?;

        debug!(
            %workflow_id,
            replayed = live_from,
            new_actions = pending.len(),
            "replayed events"
        );

        let mut sequence = history.len() as i32;
        let mut completed = false;
        for action in pending {
            if !action.is_terminal() && !self.has_room(sequence as usize + 1) {
                let failed = self.fail_over_limit(workflow_id, sequence as usize).await?;
                result.events_written += failed.events_written;
                result.completed = true;
                return Ok(result);
            }
            completed |= action.is_terminal();
            sequence = self
                .apply_action(workflow_id, sequence, action, &mut result)
                .await?;
            if completed {
                break;
            }
        }

        result.completed = completed || workflow.is_completed();
        Ok(result)
    }

    /// Whether a history of `len` non-terminal events still leaves a slot for
    /// the terminal event
    fn has_room(&self, len: usize) -> bool {
        len < self.config.max_events_per_workflow
    }

    async fn fail_over_limit(
        &self,
        workflow_id: Uuid,
        recorded: usize,
    ) -> Result<ProcessResult, ExecutorError> {
        let limit = self.config.max_events_per_workflow;
        warn!(%workflow_id, recorded, limit, "event limit reached");
        let error = WorkflowError::new(format!("workflow reached the limit of {} events", limit))
            .with_code(EVENT_LIMIT_EXCEEDED);
        self.record_failure(workflow_id, recorded, error).await
    }

    /// Append `WorkflowFailed` after `recorded` events, mark the workflow
    /// failed and drop its timers
    async fn record_failure(
        &self,
        workflow_id: Uuid,
        recorded: usize,
        error: WorkflowError,
    ) -> Result<ProcessResult, ExecutorError> {
        warn!(%workflow_id, error = %error, "failing workflow");
        self.store
            .append_events(
                workflow_id,
                recorded as i32,
                vec![WorkflowEvent::WorkflowFailed {
                    error: error.clone(),
                }],
            )
            .await?;
        self.store
            .update_workflow_status(workflow_id, WorkflowStatus::Failed, None, Some(error))
            .await?;
        self.store.cancel_timers(workflow_id).await?;

        Ok(ProcessResult {
            completed: true,
            events_written: 1,
            ..ProcessResult::default()
        })
    }

    /// Persist one action and perform its side effect
    async fn apply_action(
        &self,
        workflow_id: Uuid,
        sequence: i32,
        action: WorkflowAction,
        result: &mut ProcessResult,
    ) -> Result<i32, ExecutorError> {
        let sequence = match action {
            WorkflowAction::ScheduleActivity {
                activity_id,
                activity_type,
                input,
                options,
            } => {
                debug!(%workflow_id, %activity_id, %activity_type, "scheduling activity");

                let event = WorkflowEvent::ActivityScheduled {
                    activity_id: activity_id.clone(),
                    activity_type: activity_type.clone(),
                    input: input.clone(),
                    options: options.clone(),
                };
                let sequence = self
                    .store
                    .append_events(workflow_id, sequence, vec![event])
                    .await?;

                self.store
                    .enqueue_task(TaskDefinition {
                        workflow_id,
                        activity_id,
                        activity_type,
                        input,
                        options,
                    })
                    .await?;
                result.tasks_enqueued += 1;
                sequence
            }

            WorkflowAction::StartTimer { timer_id, duration } => {
                let fire_at = deadline_after(Utc::now(), duration);
                debug!(%workflow_id, %timer_id, ?duration, %fire_at, "starting timer");

                let event = WorkflowEvent::TimerStarted {
                    timer_id: timer_id.clone(),
                    duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                    fire_at,
                };
                let sequence = self
                    .store
                    .append_events(workflow_id, sequence, vec![event])
                    .await?;

                self.store
                    .schedule_timer(workflow_id, &timer_id, fire_at)
                    .await?;
                result.timers_scheduled += 1;
                sequence
            }

            WorkflowAction::CompleteWorkflow { result: output } => {
                info!(%workflow_id, "completing workflow");

                let event = WorkflowEvent::WorkflowCompleted {
                    result: output.clone(),
                };
                let sequence = self
                    .store
                    .append_events(workflow_id, sequence, vec![event])
                    .await?;

                self.store
                    .update_workflow_status(
                        workflow_id,
                        WorkflowStatus::Completed,
                        Some(output),
                        None,
                    )
                    .await?;
                sequence
            }

            WorkflowAction::FailWorkflow { error } => {
                warn!(%workflow_id, error = %error, "failing workflow");

                let event = WorkflowEvent::WorkflowFailed {
                    error: error.clone(),
                };
                let sequence = self
                    .store
                    .append_events(workflow_id, sequence, vec![event])
                    .await?;

                self.store
                    .update_workflow_status(workflow_id, WorkflowStatus::Failed, None, Some(error))
                    .await?;
                sequence
            }

            WorkflowAction::None => return Ok(sequence),
        };

        result.events_written += 1;
        Ok(sequence)
    }
}

/// Re-apply `history` to a fresh workflow instance
///
/// Recorded command events must match the actions the workflow produces, in
/// order. Returns the actions produced after the last recorded command, which
/// the caller still has to persist. Callbacks for events at or after
/// `live_from` run with a live context, earlier ones with a replaying context.
fn replay(
    workflow: &mut dyn AnyWorkflow,
    workflow_id: Uuid,
    history: &[WorkflowEvent],
    live_from: usize,
) -> Result<VecDeque<WorkflowAction>, ExecutorError> {
    let mut pending: VecDeque<WorkflowAction> = VecDeque::new();

    for (index, event) in history.iter().enumerate() {
        let ctx = if index < live_from {
            WorkflowContext::replaying(workflow_id)
        } else {
            WorkflowContext::new(workflow_id)
        };

        let produced = match event {
            WorkflowEvent::WorkflowStarted { .. } => workflow.on_start(&ctx),
            WorkflowEvent::ActivityCompleted {
                activity_id,
                result,
            } => workflow.on_activity_completed(&ctx, activity_id, result.clone()),
            WorkflowEvent::ActivityFailed {
                activity_id,
                error,
                will_retry,
            } => {
                if *will_retry {
                    continue;
                }
                workflow.on_activity_failed(&ctx, activity_id, error)
            }
            WorkflowEvent::TimerFired { timer_id } => workflow.on_timer_fired(&ctx, timer_id),
            WorkflowEvent::WorkflowCancelled { .. } => continue,
            command => {
                let expected = pending.pop_front().ok_or_else(|| {
                    ExecutorError::ReplayError(format!(
                        "recorded {} at position {} was not produced on replay",
                        command.kind(),
                        index
                    ))
                })?;
                if !command_matches(command, &expected) {
                    return Err(ExecutorError::ReplayError(format!(
                        "recorded {} at position {} does not match replayed action {:?}",
                        command.kind(),
                        index,
                        expected
                    )));
                }
                continue;
            }
        };

        if !pending.is_empty() {
            return Err(ExecutorError::ReplayError(format!(
                "{} at position {} arrived before {} decided action(s) were recorded",
                event.kind(),
                index,
                pending.len()
            )));
        }
        pending.extend(
            produced
                .into_iter()
                .filter(|a| !matches!(a, WorkflowAction::None)),
        );
    }

    Ok(pending)
}

/// Check a recorded command event against a replayed action
fn command_matches(event: &WorkflowEvent, action: &WorkflowAction) -> bool {
    match (event, action) {
        (
            WorkflowEvent::ActivityScheduled {
                activity_id,
                activity_type,
                input,
                ..
            },
            WorkflowAction::ScheduleActivity {
                activity_id: a_id,
                activity_type: a_type,
                input: a_input,
                ..
            },
        ) => activity_id == a_id && activity_type == a_type && input == a_input,
        (
            WorkflowEvent::TimerStarted {
                timer_id,
                duration_ms,
                ..
            },
            WorkflowAction::StartTimer {
                timer_id: a_id,
                duration,
            },
        ) => {
            timer_id == a_id
                && u64::try_from(duration.as_millis()).unwrap_or(u64::MAX) == *duration_ms
        }
        (
            WorkflowEvent::WorkflowCompleted { result },
            WorkflowAction::CompleteWorkflow { result: a_result },
        ) => result == a_result,
        (WorkflowEvent::WorkflowFailed { error }, WorkflowAction::FailWorkflow { error: a_error }) => {
            error == a_error
        }
        _ => false,
    }
}

/// Whether an event ends an activity from the workflow's point of view
fn resolves_activity(event: &WorkflowEvent) -> bool {
    matches!(
        event,
        WorkflowEvent::ActivityCompleted { .. }
            | WorkflowEvent::ActivityFailed {
                will_retry: false,
                ..
            }
    )
}

/// Find an activity that was scheduled but has no final outcome yet
fn outstanding_activity(events: &[WorkflowEvent]) -> Option<String> {
    events.iter().find_map(|e| match e {
        WorkflowEvent::ActivityScheduled { activity_id, .. } => {
            let resolved = events
                .iter()
                .any(|r| resolves_activity(r) && r.activity_id() == Some(activity_id.as_str()));
            (!resolved).then(|| activity_id.clone())
        }
        _ => None,
    })
}

/// Compute a timer deadline, saturating at the latest representable instant
fn deadline_after(now: DateTime<Utc>, duration: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
