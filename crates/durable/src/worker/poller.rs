//! Task and timer polling with adaptive backoff
//!
//! Each poll claims due durable timers and pending activity tasks in one pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, instrument, trace};

use crate::persistence::{ClaimedTask, DueTimer, StoreError, WorkflowEventStore};

/// Polling configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    /// Minimum poll interval (when work is available)
    pub min_interval: Duration,

    /// Maximum poll interval (when idle)
    pub max_interval: Duration,

    /// Backoff multiplier when no work is found
    pub backoff_multiplier: f64,

    /// Maximum tasks, and separately timers, to claim per poll
    pub batch_size: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(1),
            backoff_multiplier: 1.5,
            batch_size: 10,
        }
    }
}

impl PollerConfig {
    /// Create a new poller configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set minimum poll interval
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Set maximum poll interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// Set batch size
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }
}

/// Work claimed by a single poll
#[derive(Debug, Default)]
pub struct PollBatch {
    /// Timers whose deadline has passed
    pub timers: Vec<DueTimer>,

    /// Activity tasks ready to execute
    pub tasks: Vec<ClaimedTask>,
}

impl PollBatch {
    /// Check if nothing was claimed
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty() && self.tasks.is_empty()
    }
}

/// Poller with adaptive backoff
///
/// Polls with exponential backoff when idle and resets to the minimum
/// interval when work is found.
pub struct TaskPoller<S: WorkflowEventStore> {
    store: Arc<S>,
    worker_id: String,
    activity_types: Vec<String>,
    config: PollerConfig,
    current_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S: WorkflowEventStore> TaskPoller<S> {
    /// Create a new task poller
    pub fn new(
        store: Arc<S>,
        worker_id: String,
        activity_types: Vec<String>,
        config: PollerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            worker_id,
            activity_types,
            current_interval: config.min_interval,
            config,
            shutdown_rx,
        }
    }

    /// Claim due timers and up to `max_tasks` tasks
    ///
    /// Updates internal backoff state.
    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn poll(&mut self, max_tasks: usize) -> Result<PollBatch, PollerError> {
        if self.is_shutdown() {
            debug!("Poller shutdown requested");
            return Ok(PollBatch::default());
        }

        let timers = self
            .store
            .claim_due_timers(Utc::now(), self.config.batch_size)
            .await?;

        let batch_size = max_tasks.min(self.config.batch_size);
        let tasks = if batch_size == 0 || self.activity_types.is_empty() {
            vec![]
        } else {
            self.store
                .claim_task(&self.worker_id, &self.activity_types, batch_size)
                .await?
        };

        let batch = PollBatch { timers, tasks };
        if batch.is_empty() {
            self.increase_backoff();
            trace!(
                interval_ms = u64::try_from(self.current_interval.as_millis()).unwrap_or(u64::MAX),
                "No work found, backing off"
            );
        } else {
            self.reset_backoff();
            debug!(
                timers = batch.timers.len(),
                tasks = batch.tasks.len(),
                "Claimed work"
            );
        }

        Ok(batch)
    }

    /// Wait for the current backoff interval
    ///
    /// Returns `true` if shutdown was signaled while waiting.
    pub async fn wait(&mut self) -> bool {
        if self.is_shutdown() {
            return true;
        }
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(self.current_interval) => false,
            _ = shutdown_rx.changed() => {
                debug!("Shutdown signal received during wait");
                true
            }
        }
    }

    /// Get the current poll interval
    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    fn reset_backoff(&mut self) {
        self.current_interval = self.config.min_interval;
    }

    fn increase_backoff(&mut self) {
        let next = self
            .current_interval
            .mul_f64(self.config.backoff_multiplier);
        self.current_interval = next.min(self.config.max_interval);
    }
}

/// Poller errors
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{InMemoryWorkflowEventStore, TaskDefinition};
    use crate::workflow::ActivityOptions;
    use uuid::Uuid;

    fn poller(
        store: Arc<InMemoryWorkflowEventStore>,
        config: PollerConfig,
    ) -> (TaskPoller<InMemoryWorkflowEventStore>, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let poller = TaskPoller::new(
            store,
            "worker-1".to_string(),
            vec!["check_status".to_string()],
            config,
            rx,
        );
        (poller, tx)
    }

    #[test]
    fn test_default_config() {
        let config = PollerConfig::default();
        assert_eq!(config.min_interval, Duration::from_millis(100));
        assert_eq!(config.max_interval, Duration::from_secs(1));
        assert_eq!(config.backoff_multiplier, 1.5);
        assert_eq!(config.batch_size, 10);
    }

    #[test]
    fn test_config_builder() {
        let config = PollerConfig::new()
            .with_min_interval(Duration::from_millis(50))
            .with_max_interval(Duration::from_secs(10))
            .with_backoff_multiplier(0.5)
            .with_batch_size(0);

        assert_eq!(config.min_interval, Duration::from_millis(50));
        assert_eq!(config.max_interval, Duration::from_secs(10));
        assert_eq!(config.backoff_multiplier, 1.0);
        assert_eq!(config.batch_size, 1);
    }

    #[tokio::test]
    async fn test_backoff_grows_when_idle_and_resets_on_work() {
        let store = Arc::new(InMemoryWorkflowEventStore::new());
        let config = PollerConfig::new()
            .with_min_interval(Duration::from_millis(100))
            .with_max_interval(Duration::from_millis(300))
            .with_backoff_multiplier(2.0);
        let (mut poller, _tx) = poller(Arc::clone(&store), config);

        poller.poll(10).await.unwrap();
        assert_eq!(poller.current_interval(), Duration::from_millis(200));
        poller.poll(10).await.unwrap();
        assert_eq!(poller.current_interval(), Duration::from_millis(300));

        store
            .schedule_timer(Uuid::now_v7(), "poll-wait-1", Utc::now())
            .await
            .unwrap();
        let batch = poller.poll(10).await.unwrap();
        assert_eq!(batch.timers.len(), 1);
        assert_eq!(poller.current_interval(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_poll_claims_tasks_within_slots() {
        let store = Arc::new(InMemoryWorkflowEventStore::new());
        let workflow_id = Uuid::now_v7();
        for i in 0..3 {
            store
                .enqueue_task(TaskDefinition {
                    workflow_id,
                    activity_id: format!("check-status-{i}"),
                    activity_type: "check_status".to_string(),
                    input: serde_json::json!({}),
                    options: ActivityOptions::default(),
                })
                .await
                .unwrap();
        }
        let (mut poller, _tx) = poller(Arc::clone(&store), PollerConfig::default());

        let batch = poller.poll(2).await.unwrap();
        assert_eq!(batch.tasks.len(), 2);

        let batch = poller.poll(0).await.unwrap();
        assert!(batch.tasks.is_empty());
        assert_eq!(store.pending_task_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_polling() {
        let store = Arc::new(InMemoryWorkflowEventStore::new());
        store
            .schedule_timer(Uuid::now_v7(), "poll-wait-1", Utc::now())
            .await
            .unwrap();
        let (mut poller, tx) = poller(Arc::clone(&store), PollerConfig::default());

        tx.send(true).unwrap();
        assert!(poller.is_shutdown());
        assert!(poller.poll(10).await.unwrap().is_empty());
        assert!(poller.wait().await);
        assert_eq!(store.pending_timer_count(), 1);
    }
}
