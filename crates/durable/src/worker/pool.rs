//! Worker pool for task execution
//!
//! Fires due durable timers and executes activity tasks with bounded
//! concurrency and graceful shutdown.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::poller::{PollerConfig, TaskPoller};
use crate::activity::{Activity, ActivityContext, ActivityError};
use crate::engine::{ExecutorError, WorkflowExecutor};
use crate::persistence::{
    ClaimedTask, DueTimer, StoreError, TaskFailureOutcome, WorkflowEventStore,
};
use crate::workflow::{WorkflowError, WorkflowEvent};

/// Error code of a workflow failed because a timer firing or activity outcome
/// could not be delivered to it
pub const DELIVERY_FAILED: &str = "DELIVERY_FAILED";

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Unique worker ID (generated if not provided)
    pub worker_id: String,

    /// Maximum concurrent task executions
    pub max_concurrency: usize,

    /// Poller configuration
    pub poller: PollerConfig,

    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,

    /// Attempts to deliver a timer firing or activity outcome to its workflow
    pub delivery_attempts: u32,

    /// Pause between delivery attempts
    pub delivery_backoff: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            max_concurrency: 10,
            poller: PollerConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
            delivery_attempts: 5,
            delivery_backoff: Duration::from_millis(200),
        }
    }
}

impl WorkerPoolConfig {
    /// Create a new worker pool configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker ID
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Set maximum concurrency
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Set poller configuration
    pub fn with_poller(mut self, config: PollerConfig) -> Self {
        self.poller = config;
        self
    }

    /// Set shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set how often and how far apart delivery to the executor is retried
    pub fn with_delivery_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.delivery_attempts = attempts.max(1);
        self.delivery_backoff = backoff;
        self
    }
}

/// Worker pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolStatus {
    /// Worker is running and accepting tasks
    Running,
    /// Worker is draining (completing current tasks, not accepting new ones)
    Draining,
    /// Worker has stopped
    Stopped,
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Worker already running
    #[error("worker pool is already running")]
    AlreadyRunning,

    /// Shutdown timeout
    #[error("graceful shutdown timed out")]
    ShutdownTimeout,

    /// Activity handler not found
    #[error("no handler registered for activity type: {0}")]
    HandlerNotFound(String),
}

/// Activity execution result
pub type ActivityResult = Result<serde_json::Value, ActivityError>;

/// Type-erased activity handler
pub type ActivityHandler = Arc<
    dyn Fn(ActivityContext, serde_json::Value) -> Pin<Box<dyn Future<Output = ActivityResult> + Send>>
        + Send
        + Sync,
>;

/// Worker pool that drives workflows forward
///
/// Each poll fires due durable timers through the executor, then claims and
/// executes activity tasks. Activity outcomes are reported back to the
/// executor, which resumes the owning workflow.
///
/// # Example
///
/// ```ignore
/// use timekeeper_durable::prelude::*;
///
/// let pool = WorkerPool::new(executor, WorkerPoolConfig::new().with_max_concurrency(10));
/// pool.register_activity(CheckStatusActivity::new(client));
///
/// pool.start()?;
///
/// // ... later, graceful shutdown
/// pool.shutdown().await?;
/// ```
pub struct WorkerPool<S: WorkflowEventStore> {
    executor: Arc<WorkflowExecutor<S>>,
    config: WorkerPoolConfig,
    handlers: RwLock<HashMap<String, ActivityHandler>>,
    shutdown_tx: watch::Sender<bool>,
    status: RwLock<WorkerPoolStatus>,
    active_tasks: Arc<Semaphore>,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<S: WorkflowEventStore> WorkerPool<S> {
    /// Create a new worker pool
    pub fn new(executor: Arc<WorkflowExecutor<S>>, config: WorkerPoolConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            executor,
            active_tasks: Arc::new(Semaphore::new(config.max_concurrency)),
            config,
            handlers: RwLock::new(HashMap::new()),
            shutdown_tx,
            status: RwLock::new(WorkerPoolStatus::Stopped),
            poll_handle: Mutex::new(None),
        }
    }

    /// Register an activity implementation
    ///
    /// Registration must happen before [`start`](Self::start); handlers are
    /// snapshotted when the poll loop starts.
    pub fn register_activity<A: Activity>(&self, activity: A) {
        let activity = Arc::new(activity);
        let handler: ActivityHandler = Arc::new(move |ctx, input| {
            let activity = Arc::clone(&activity);
            Box::pin(async move {
                let input: A::Input = serde_json::from_value(input).map_err(|e| {
                    ActivityError::non_retryable(format!("invalid input for {}: {}", A::TYPE, e))
                        .with_type("INVALID_INPUT")
                })?;
                let output = activity.execute(&ctx, input).await?;
                serde_json::to_value(output).map_err(|e| {
                    ActivityError::non_retryable(format!("unserializable output: {}", e))
                        .with_type("SERIALIZATION")
                })
            })
        });

        self.handlers.write().insert(A::TYPE.to_string(), handler);
        debug!(activity_type = A::TYPE, "registered activity");
    }

    /// Activity types with a registered handler
    pub fn activity_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Start the worker pool
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub fn start(&self) -> Result<(), WorkerPoolError> {
        {
            let mut status = self.status.write();
            if *status != WorkerPoolStatus::Stopped {
                return Err(WorkerPoolError::AlreadyRunning);
            }
            *status = WorkerPoolStatus::Running;
        }
        self.shutdown_tx.send_replace(false);

        info!(
            worker_id = %self.config.worker_id,
            activity_types = ?self.activity_types(),
            max_concurrency = self.config.max_concurrency,
            "Starting worker pool"
        );

        self.start_poll_loop();
        Ok(())
    }

    /// Shutdown the worker pool gracefully
    ///
    /// Stops polling, then waits for running activities up to the configured
    /// timeout. Activities still running at the deadline keep running
    /// detached and report their outcome when they finish.
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn shutdown(&self) -> Result<(), WorkerPoolError> {
        {
            let mut status = self.status.write();
            if *status == WorkerPoolStatus::Stopped {
                return Ok(());
            }
            *status = WorkerPoolStatus::Draining;
        }

        info!(worker_id = %self.config.worker_id, "Initiating graceful shutdown");
        self.shutdown_tx.send_replace(true);

        let poll_handle = self.poll_handle.lock().take();
        if let Some(handle) = poll_handle {
            if let Err(e) = handle.await {
                error!("Poll loop terminated abnormally: {}", e);
            }
        }

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        loop {
            let available = self.active_tasks.available_permits();
            if available == self.config.max_concurrency {
                debug!("All tasks completed");
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining_tasks = self.config.max_concurrency - available,
                    "Shutdown timeout reached with activities still running"
                );
                *self.status.write() = WorkerPoolStatus::Stopped;
                return Err(WorkerPoolError::ShutdownTimeout);
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        *self.status.write() = WorkerPoolStatus::Stopped;
        info!(worker_id = %self.config.worker_id, "Worker pool stopped");
        Ok(())
    }

    /// Get current status
    pub fn status(&self) -> WorkerPoolStatus {
        *self.status.read()
    }

    /// Get the worker ID
    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Start the polling loop
    fn start_poll_loop(&self) {
        let executor = Arc::clone(&self.executor);
        let config = self.config.clone();
        let handlers = self.handlers.read().clone();
        let active_tasks = Arc::clone(&self.active_tasks);
        let shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut poller = TaskPoller::new(
                executor.shared_store(),
                config.worker_id.clone(),
                handlers.keys().cloned().collect(),
                config.poller.clone(),
                shutdown_rx,
            );

            loop {
                if poller.is_shutdown() {
                    debug!("Poll loop: shutdown requested");
                    break;
                }

                let available_slots = active_tasks.available_permits();
                match poller.poll(available_slots).await {
                    Ok(batch) => {
                        for timer in batch.timers {
                            fire_timer(&executor, &config, timer).await;
                        }

                        for task in batch.tasks {
                            let Some(handler) = handlers.get(&task.activity_type).cloned() else {
                                warn!(activity_type = %task.activity_type, "No handler registered");
                                let error = ActivityError::non_retryable(
                                    WorkerPoolError::HandlerNotFound(task.activity_type.clone())
                                        .to_string(),
                                )
                                .with_type("HANDLER_NOT_FOUND");
                                report(&executor, &config, &task, Err(error)).await;
                                continue;
                            };

                            let permit = match Arc::clone(&active_tasks).acquire_owned().await {
                                Ok(p) => p,
                                Err(_) => break,
                            };

                            let executor = Arc::clone(&executor);
                            let config = config.clone();
                            tokio::spawn(async move {
                                execute_task(&executor, &config, handler, task).await;
                                drop(permit);
                            });
                        }
                    }
                    Err(e) => {
                        error!("Poll error: {}", e);
                    }
                }

                if poller.wait().await {
                    break;
                }
            }

            debug!("Poll loop exited");
        });

        *self.poll_handle.lock() = Some(handle);
    }
}

/// Resume a workflow whose timer is due
///
/// The timer was removed from the store when it was claimed. If the firing
/// can be neither delivered nor turned into a failure, it is scheduled again
/// so a later poll retries it.
async fn fire_timer<S: WorkflowEventStore>(
    executor: &WorkflowExecutor<S>,
    config: &WorkerPoolConfig,
    timer: DueTimer,
) {
    let lag_ms = (chrono::Utc::now() - timer.fire_at).num_milliseconds();
    debug!(workflow_id = %timer.workflow_id, timer_id = %timer.timer_id, lag_ms, "Firing timer");

    let event = WorkflowEvent::TimerFired {
        timer_id: timer.timer_id.clone(),
    };
    match deliver(executor, config, timer.workflow_id, event).await {
        Ok(()) => {}
        Err(e) if e.is_transient() => {
            error!(
                workflow_id = %timer.workflow_id,
                timer_id = %timer.timer_id,
                "Timer could not be delivered, rescheduling: {}",
                e
            );
            reschedule(executor, config, &timer).await;
        }
        Err(e) => {
            error!(
                workflow_id = %timer.workflow_id,
                timer_id = %timer.timer_id,
                "Dropping undeliverable timer: {}",
                e
            );
        }
    }
}

async fn reschedule<S: WorkflowEventStore>(
    executor: &WorkflowExecutor<S>,
    config: &WorkerPoolConfig,
    timer: &DueTimer,
) {
    let retry_at = chrono::Utc::now()
        + chrono::Duration::from_std(config.delivery_backoff)
            .unwrap_or_else(|_| chrono::Duration::zero());
    if let Err(e) = executor
        .store()
        .schedule_timer(timer.workflow_id, &timer.timer_id, retry_at)
        .await
    {
        error!(
            workflow_id = %timer.workflow_id,
            timer_id = %timer.timer_id,
            "Failed to reschedule timer: {}",
            e
        );
    }
}

/// Execute one claimed task and report its outcome
async fn execute_task<S: WorkflowEventStore>(
    executor: &WorkflowExecutor<S>,
    config: &WorkerPoolConfig,
    handler: ActivityHandler,
    task: ClaimedTask,
) {
    let ctx = ActivityContext::new(
        task.workflow_id,
        task.activity_id.clone(),
        task.attempt,
        task.max_attempts,
    );

    let timeout = task.options.start_to_close_timeout;
    let outcome = match tokio::time::timeout(timeout, handler(ctx, task.input.clone())).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ActivityError::retryable(format!(
            "activity exceeded start-to-close timeout of {:?}",
            timeout
        ))
        .with_type("TIMEOUT")),
    };

    report(executor, config, &task, outcome).await;
}

/// Record a task outcome in the queue and deliver it to the workflow
///
/// The activity is never executed again to recover a lost outcome: its side
/// effect already happened.
async fn report<S: WorkflowEventStore>(
    executor: &WorkflowExecutor<S>,
    config: &WorkerPoolConfig,
    task: &ClaimedTask,
    outcome: ActivityResult,
) {
    let event = match outcome {
        Ok(output) => {
            debug!(task_id = %task.id, activity_id = %task.activity_id, "Activity completed");
            if let Err(e) = executor.store().complete_task(task.id).await {
                warn!(task_id = %task.id, "Failed to mark task completed: {}", e);
            }
            WorkflowEvent::ActivityCompleted {
                activity_id: task.activity_id.clone(),
                result: output,
            }
        }
        Err(error) => {
            let retryable = error.retryable
                && task
                    .options
                    .retry_policy
                    .should_retry(error.error_type.as_deref());
            let will_retry = match executor
                .store()
                .fail_task(task.id, &error.message, retryable)
                .await
            {
                Ok(failure) => matches!(failure, TaskFailureOutcome::WillRetry { .. }),
                Err(e) => {
                    warn!(task_id = %task.id, "Failed to record task failure: {}", e);
                    false
                }
            };

            warn!(
                task_id = %task.id,
                activity_id = %task.activity_id,
                attempt = task.attempt,
                will_retry,
                error = %error,
                "Activity failed"
            );
            WorkflowEvent::ActivityFailed {
                activity_id: task.activity_id.clone(),
                error,
                will_retry,
            }
        }
    };

    if let Err(e) = deliver(executor, config, task.workflow_id, event).await {
        error!(task_id = %task.id, activity_id = %task.activity_id, "Activity outcome lost: {}", e);
    }
}

/// Deliver an input event to its workflow
///
/// Transient store errors are retried `delivery_attempts` times. When the
/// event cannot be delivered the workflow is failed with [`DELIVERY_FAILED`],
/// so it never stays running with nothing left to resume it. Returns an error
/// only if failing the workflow did not succeed either.
async fn deliver<S: WorkflowEventStore>(
    executor: &WorkflowExecutor<S>,
    config: &WorkerPoolConfig,
    workflow_id: Uuid,
    event: WorkflowEvent,
) -> Result<(), ExecutorError> {
    let kind = event.kind();
    let mut attempt = 1;
    let cause = loop {
        match executor.deliver(workflow_id, event.clone()).await {
            Ok(_) => return Ok(()),
            Err(e) if e.is_transient() && attempt < config.delivery_attempts => {
                warn!(%workflow_id, event = kind, attempt, "Delivery failed, retrying: {}", e);
                tokio::time::sleep(config.delivery_backoff).await;
                attempt += 1;
            }
            Err(e) => break e,
        }
    };

    error!(%workflow_id, event = kind, attempts = attempt, "Giving up on delivery: {}", cause);
    let error = WorkflowError::new(format!("{} could not be delivered: {}", kind, cause))
        .with_code(DELIVERY_FAILED);
    executor.fail_workflow(workflow_id, error).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{
        InMemoryWorkflowEventStore, TaskDefinition, WorkflowInfo, WorkflowStatus,
    };
    use crate::reliability::RetryPolicy;
    use crate::workflow::{
        ActivityOptions, Workflow, WorkflowAction, WorkflowContext, WorkflowError,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct PingInput {
        message: String,
        max_attempts: u32,
    }

    struct PingWorkflow {
        input: PingInput,
        reply: Option<serde_json::Value>,
        error: Option<WorkflowError>,
    }

    impl Workflow for PingWorkflow {
        const TYPE: &'static str = "ping_workflow";
        type Input = PingInput;
        type Output = serde_json::Value;

        fn new(input: Self::Input) -> Self {
            Self {
                input,
                reply: None,
                error: None,
            }
        }

        fn on_start(&mut self, _ctx: &WorkflowContext) -> Vec<WorkflowAction> {
            vec![WorkflowAction::timer("pause", Duration::from_millis(20))]
        }

        fn on_timer_fired(&mut self, _ctx: &WorkflowContext, _timer_id: &str) -> Vec<WorkflowAction> {
            let policy = RetryPolicy::fixed(Duration::ZERO, self.input.max_attempts);
            vec![WorkflowAction::schedule_activity(
                "ping",
                PingActivity::TYPE,
                serde_json::json!(self.input.message),
            )
            .with_options(ActivityOptions::default().with_retry(policy))]
        }

        fn on_activity_completed(
            &mut self,
            _ctx: &WorkflowContext,
            _activity_id: &str,
            result: serde_json::Value,
        ) -> Vec<WorkflowAction> {
            self.reply = Some(result.clone());
            vec![WorkflowAction::complete(result)]
        }

        fn on_activity_failed(
            &mut self,
            _ctx: &WorkflowContext,
            _activity_id: &str,
            error: &ActivityError,
        ) -> Vec<WorkflowAction> {
            let error = WorkflowError::new(&error.message);
            self.error = Some(error.clone());
            vec![WorkflowAction::fail(error)]
        }

        fn is_completed(&self) -> bool {
            self.reply.is_some() || self.error.is_some()
        }

        fn result(&self) -> Option<Self::Output> {
            self.reply.clone()
        }

        fn error(&self) -> Option<WorkflowError> {
            self.error.clone()
        }
    }

    /// Fails the first `failures` calls with a retryable error
    struct PingActivity {
        calls: Arc<AtomicU32>,
        failures: u32,
    }

    #[async_trait]
    impl Activity for PingActivity {
        const TYPE: &'static str = "ping";
        type Input = String;
        type Output = String;

        async fn execute(
            &self,
            ctx: &ActivityContext,
            input: Self::Input,
        ) -> Result<Self::Output, ActivityError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(ActivityError::retryable(format!("flaky attempt {}", ctx.attempt)));
            }
            Ok(format!("pong: {}", input))
        }
    }

    /// In-memory store whose appends of the listed event kinds fail with a
    /// backend error while `outages` is above zero
    struct FlakyStore {
        inner: InMemoryWorkflowEventStore,
        failing_kinds: Vec<&'static str>,
        outages: Arc<AtomicU32>,
    }

    impl FlakyStore {
        fn new(failing_kinds: Vec<&'static str>, outages: u32) -> Self {
            Self {
                inner: InMemoryWorkflowEventStore::new(),
                failing_kinds,
                outages: Arc::new(AtomicU32::new(outages)),
            }
        }
    }

    #[async_trait]
    impl WorkflowEventStore for FlakyStore {
        async fn create_workflow(
            &self,
            workflow_id: Uuid,
            workflow_type: &str,
            input: serde_json::Value,
        ) -> Result<(), StoreError> {
            self.inner.create_workflow(workflow_id, workflow_type, input).await
        }

        async fn get_workflow_status(&self, workflow_id: Uuid) -> Result<WorkflowStatus, StoreError> {
            self.inner.get_workflow_status(workflow_id).await
        }

        async fn get_workflow_info(&self, workflow_id: Uuid) -> Result<WorkflowInfo, StoreError> {
            self.inner.get_workflow_info(workflow_id).await
        }

        async fn append_events(
            &self,
            workflow_id: Uuid,
            expected_sequence: i32,
            events: Vec<WorkflowEvent>,
        ) -> Result<i32, StoreError> {
            let targeted = events
                .first()
                .is_some_and(|e| self.failing_kinds.contains(&e.kind()));
            if targeted
                && self
                    .outages
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(StoreError::Backend("connection reset".to_string()));
            }
            self.inner
                .append_events(workflow_id, expected_sequence, events)
                .await
        }

        async fn load_events(
            &self,
            workflow_id: Uuid,
        ) -> Result<Vec<(i32, WorkflowEvent)>, StoreError> {
            self.inner.load_events(workflow_id).await
        }

        async fn update_workflow_status(
            &self,
            workflow_id: Uuid,
            status: WorkflowStatus,
            result: Option<serde_json::Value>,
            error: Option<WorkflowError>,
        ) -> Result<(), StoreError> {
            self.inner
                .update_workflow_status(workflow_id, status, result, error)
                .await
        }

        async fn enqueue_task(&self, task: TaskDefinition) -> Result<Uuid, StoreError> {
            self.inner.enqueue_task(task).await
        }

        async fn claim_task(
            &self,
            worker_id: &str,
            activity_types: &[String],
            max_tasks: usize,
        ) -> Result<Vec<ClaimedTask>, StoreError> {
            self.inner.claim_task(worker_id, activity_types, max_tasks).await
        }

        async fn complete_task(&self, task_id: Uuid) -> Result<(), StoreError> {
            self.inner.complete_task(task_id).await
        }

        async fn fail_task(
            &self,
            task_id: Uuid,
            error: &str,
            retryable: bool,
        ) -> Result<TaskFailureOutcome, StoreError> {
            self.inner.fail_task(task_id, error, retryable).await
        }

        async fn schedule_timer(
            &self,
            workflow_id: Uuid,
            timer_id: &str,
            fire_at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.inner.schedule_timer(workflow_id, timer_id, fire_at).await
        }

        async fn claim_due_timers(
            &self,
            now: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<DueTimer>, StoreError> {
            self.inner.claim_due_timers(now, limit).await
        }

        async fn cancel_timers(&self, workflow_id: Uuid) -> Result<usize, StoreError> {
            self.inner.cancel_timers(workflow_id).await
        }
    }

    fn test_config() -> WorkerPoolConfig {
        WorkerPoolConfig::new()
            .with_worker_id("test-worker")
            .with_poller(
                PollerConfig::new()
                    .with_min_interval(Duration::from_millis(5))
                    .with_max_interval(Duration::from_millis(20)),
            )
    }

    fn setup_with<S: WorkflowEventStore>(
        store: S,
        config: WorkerPoolConfig,
        failures: u32,
    ) -> (Arc<WorkflowExecutor<S>>, WorkerPool<S>, Arc<AtomicU32>) {
        let mut executor = WorkflowExecutor::new(store);
        executor.register::<PingWorkflow>();
        let executor = Arc::new(executor);

        let pool = WorkerPool::new(Arc::clone(&executor), config);
        let calls = Arc::new(AtomicU32::new(0));
        pool.register_activity(PingActivity {
            calls: Arc::clone(&calls),
            failures,
        });
        (executor, pool, calls)
    }

    fn setup(failures: u32) -> (Arc<WorkflowExecutor<InMemoryWorkflowEventStore>>, WorkerPool<InMemoryWorkflowEventStore>, Arc<AtomicU32>) {
        setup_with(InMemoryWorkflowEventStore::new(), test_config(), failures)
    }

    fn ping(message: &str) -> PingInput {
        PingInput {
            message: message.to_string(),
            max_attempts: 1,
        }
    }

    async fn wait_for_terminal<S: WorkflowEventStore>(
        executor: &WorkflowExecutor<S>,
        workflow_id: Uuid,
    ) -> WorkflowStatus {
        for _ in 0..200 {
            let status = executor.store().get_workflow_status(workflow_id).await.unwrap();
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("workflow did not reach a terminal state");
    }

    #[test]
    fn test_default_config() {
        let config = WorkerPoolConfig::default();
        assert!(config.worker_id.starts_with("worker-"));
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.delivery_attempts, 5);
        assert_eq!(config.delivery_backoff, Duration::from_millis(200));
    }

    #[test]
    fn test_config_builder() {
        let config = WorkerPoolConfig::new()
            .with_worker_id("test-worker")
            .with_max_concurrency(0)
            .with_shutdown_timeout(Duration::from_secs(1))
            .with_delivery_retry(0, Duration::from_millis(5));

        assert_eq!(config.worker_id, "test-worker");
        assert_eq!(config.max_concurrency, 1);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.delivery_attempts, 1);
    }

    #[tokio::test]
    async fn test_timer_then_activity_completes_workflow() {
        let (executor, pool, calls) = setup(0);
        assert_eq!(pool.activity_types(), vec!["ping".to_string()]);
        pool.start().unwrap();

        let workflow_id = executor
            .start_workflow::<PingWorkflow>(PingInput {
                message: "hello".to_string(),
                max_attempts: 1,
            })
            .await
            .unwrap();

        assert_eq!(
            wait_for_terminal(&executor, workflow_id).await,
            WorkflowStatus::Completed
        );
        let info = executor.workflow_info(workflow_id).await.unwrap();
        assert_eq!(info.result, Some(serde_json::json!("pong: hello")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        pool.shutdown().await.unwrap();
        assert_eq!(pool.status(), WorkerPoolStatus::Stopped);
    }

    #[tokio::test]
    async fn test_retryable_failure_is_retried() {
        let (executor, pool, calls) = setup(1);
        pool.start().unwrap();

        let workflow_id = executor
            .start_workflow::<PingWorkflow>(PingInput {
                message: "again".to_string(),
                max_attempts: 2,
            })
            .await
            .unwrap();

        assert_eq!(
            wait_for_terminal(&executor, workflow_id).await,
            WorkflowStatus::Completed
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_exhausted_failure_fails_workflow() {
        let (executor, pool, _calls) = setup(5);
        pool.start().unwrap();

        let workflow_id = executor
            .start_workflow::<PingWorkflow>(PingInput {
                message: "never".to_string(),
                max_attempts: 1,
            })
            .await
            .unwrap();

        assert_eq!(
            wait_for_terminal(&executor, workflow_id).await,
            WorkflowStatus::Failed
        );
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let (_executor, pool, _calls) = setup(0);
        pool.start().unwrap();
        assert!(matches!(pool.start(), Err(WorkerPoolError::AlreadyRunning)));
        pool.shutdown().await.unwrap();

        // A stopped pool can be started again
        pool.start().unwrap();
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_timer_delivery_retried_after_store_error() {
        let store = FlakyStore::new(vec!["timer_fired"], 1);
        let config = test_config().with_delivery_retry(3, Duration::from_millis(5));
        let (executor, pool, calls) = setup_with(store, config, 0);
        pool.start().unwrap();

        let workflow_id = executor.start_workflow::<PingWorkflow>(ping("retry")).await.unwrap();

        assert_eq!(
            wait_for_terminal(&executor, workflow_id).await,
            WorkflowStatus::Completed
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(executor.store().outages.load(Ordering::SeqCst), 0);

        let fired = executor
            .history(workflow_id)
            .await
            .unwrap()
            .iter()
            .filter(|e| matches!(e, WorkflowEvent::TimerFired { .. }))
            .count();
        assert_eq!(fired, 1);
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_timer_rescheduled_when_workflow_cannot_be_failed() {
        // The firing and the fallback failure both hit the outage
        let store = FlakyStore::new(vec!["timer_fired", "workflow_failed"], 2);
        let config = test_config().with_delivery_retry(1, Duration::from_millis(5));
        let (executor, pool, calls) = setup_with(store, config, 0);
        pool.start().unwrap();

        let workflow_id = executor.start_workflow::<PingWorkflow>(ping("later")).await.unwrap();

        assert_eq!(
            wait_for_terminal(&executor, workflow_id).await,
            WorkflowStatus::Completed
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(executor.store().outages.load(Ordering::SeqCst), 0);
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_undeliverable_outcome_fails_workflow() {
        let store = FlakyStore::new(vec!["activity_completed"], 1);
        let config = test_config().with_delivery_retry(1, Duration::from_millis(5));
        let (executor, pool, calls) = setup_with(store, config, 0);
        pool.start().unwrap();

        let workflow_id = executor.start_workflow::<PingWorkflow>(ping("lost")).await.unwrap();

        assert_eq!(
            wait_for_terminal(&executor, workflow_id).await,
            WorkflowStatus::Failed
        );
        let info = executor.workflow_info(workflow_id).await.unwrap();
        assert_eq!(info.error.and_then(|e| e.code), Some(DELIVERY_FAILED.to_string()));

        // The activity is not run again to recover its outcome
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        pool.shutdown().await.unwrap();
    }
}
