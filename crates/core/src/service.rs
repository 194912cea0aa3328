//! Poll run service
//!
//! Wires the polling workflow, its activities, the executor and a worker
//! pool together over one event store. This is what the HTTP entry point
//! talks to.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use timekeeper_durable::prelude::{
    ExecutorConfig, ExecutorError, StoreError, WorkerPool, WorkerPoolConfig, WorkerPoolError,
    WorkflowError, WorkflowEventStore, WorkflowExecutor, WorkflowStatus,
};
use timekeeper_durable::worker::WorkerPoolStatus;
use tracing::info;
use uuid::Uuid;

use crate::activities::{CheckStatusActivity, FireActionActivity};
use crate::http::HttpClient;
use crate::request::{PollRequest, ValidationError};
use crate::workflow::{PollSummary, PollingWorkflow};

/// Service errors
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request failed validation
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No run with this ID
    #[error("run not found: {0}")]
    NotFound(Uuid),

    /// The run already reached a terminal state
    #[error("run {0} already finished")]
    AlreadyFinished(Uuid),

    /// The run cannot be cancelled while a call is outstanding
    #[error("run {run_id} has activity {activity_id} in flight")]
    ActivityInFlight { run_id: Uuid, activity_id: String },

    /// Executor error
    #[error("executor error: {0}")]
    Executor(ExecutorError),

    /// Worker pool error
    #[error("worker error: {0}")]
    Worker(#[from] WorkerPoolError),

    /// Stored output could not be decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ExecutorError> for ServiceError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::WorkflowNotFound(id)
            | ExecutorError::Store(StoreError::WorkflowNotFound(id)) => ServiceError::NotFound(id),
            ExecutorError::WorkflowCompleted(id) => ServiceError::AlreadyFinished(id),
            ExecutorError::ActivityInFlight {
                workflow_id,
                activity_id,
            } => ServiceError::ActivityInFlight {
                run_id: workflow_id,
                activity_id,
            },
            other => ServiceError::Executor(other),
        }
    }
}

/// Externally visible state of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub id: Uuid,
    pub status: WorkflowStatus,
    pub output: Option<PollSummary>,
    pub error: Option<WorkflowError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Starts, inspects and cancels poll runs
pub struct PollingService<S: WorkflowEventStore> {
    executor: Arc<WorkflowExecutor<S>>,
    pool: WorkerPool<S>,
}

impl<S: WorkflowEventStore> PollingService<S> {
    /// Create a service over a shared store
    pub fn new(store: Arc<S>, client: Arc<dyn HttpClient>, worker: WorkerPoolConfig) -> Self {
        Self::with_executor_config(store, client, worker, ExecutorConfig::default())
    }

    /// Create a service with explicit executor limits
    pub fn with_executor_config(
        store: Arc<S>,
        client: Arc<dyn HttpClient>,
        worker: WorkerPoolConfig,
        executor_config: ExecutorConfig,
    ) -> Self {
        let mut executor = WorkflowExecutor::from_shared(store, executor_config);
        executor.register::<PollingWorkflow>();
        let executor = Arc::new(executor);

        let pool = WorkerPool::new(Arc::clone(&executor), worker);
        pool.register_activity(CheckStatusActivity::new(Arc::clone(&client)));
        pool.register_activity(FireActionActivity::new(client));

        Self { executor, pool }
    }

    /// The executor driving runs
    pub fn executor(&self) -> &Arc<WorkflowExecutor<S>> {
        &self.executor
    }

    /// Start the worker pool
    pub fn run(&self) -> Result<(), ServiceError> {
        self.pool.start()?;
        Ok(())
    }

    /// Stop the worker pool gracefully
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        self.pool.shutdown().await?;
        Ok(())
    }

    /// Worker pool state
    pub fn worker_status(&self) -> WorkerPoolStatus {
        self.pool.status()
    }

    /// Validate a request and start a run
    pub async fn start(&self, request: PollRequest) -> Result<Uuid, ServiceError> {
        request.validate()?;
        let events = PollingWorkflow::event_budget(&request.retry_policy);
        let limit = self.executor.config().max_events_per_workflow;
        if events > limit {
            return Err(ValidationError::HistoryLimit {
                max_retries: request.retry_policy.max_retries,
                events,
                limit,
            }
            .into());
        }

        let run_id = self
            .executor
            .start_workflow::<PollingWorkflow>(request)
            .await?;
        info!(%run_id, "poll run accepted");
        Ok(run_id)
    }

    /// Deserialize, validate and start a run from raw JSON
    pub async fn start_json(&self, body: serde_json::Value) -> Result<Uuid, ServiceError> {
        self.start(PollRequest::from_json(body)?).await
    }

    /// Current state of a run
    pub async fn status(&self, run_id: Uuid) -> Result<RunStatus, ServiceError> {
        let info = self.executor.workflow_info(run_id).await?;
        let output = info.result.map(serde_json::from_value).transpose()?;

        Ok(RunStatus {
            id: info.id,
            status: info.status,
            output,
            error: info.error,
            created_at: info.created_at,
            updated_at: info.updated_at,
        })
    }

    /// Cancel a run that is waiting between attempts
    pub async fn cancel(&self, run_id: Uuid, reason: &str) -> Result<(), ServiceError> {
        self.executor.cancel_workflow(run_id, reason).await?;
        Ok(())
    }
}
