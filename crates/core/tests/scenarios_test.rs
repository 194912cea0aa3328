//! End-to-end poll runs against a scripted HTTP client
//!
//! Timers are fired by hand and activities are executed inline, so every
//! scenario runs deterministically through the real executor and store.
//!
//! Run with: cargo test -p timekeeper-core --test scenarios_test

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;
use url::Url;
use uuid::Uuid;

use timekeeper_core::{
    CheckStatusActivity, FireActionActivity, HttpClient, HttpMethod, HttpRequest, HttpResponse,
    PollMode, PollRequest, PollSummary, PollingWorkflow, RetryPolicy, RunOutcome, TransportError,
    TRANSPORT_ERROR, TRIGGER_FAILED,
};
use timekeeper_durable::prelude::*;

/// Replays a fixed script of status responses and one action response
struct ScriptedClient {
    statuses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    action: Result<HttpResponse, TransportError>,
    calls: Mutex<Vec<(HttpMethod, String)>>,
}

impl ScriptedClient {
    fn new(statuses: Vec<Result<HttpResponse, TransportError>>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            action: Ok(HttpResponse::new(200, "")),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn always_pending() -> Self {
        Self::new(vec![])
    }

    fn with_action(mut self, action: Result<HttpResponse, TransportError>) -> Self {
        self.action = action;
        self
    }

    fn count(&self, method: HttpMethod) -> usize {
        self.calls.lock().iter().filter(|(m, _)| *m == method).count()
    }
}

#[async_trait]
impl HttpClient for ScriptedClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.calls
            .lock()
            .push((request.method, request.url.to_string()));
        match request.method {
            HttpMethod::Get => self
                .statuses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::new(202, ""))),
            HttpMethod::Post => self.action.clone(),
        }
    }
}

fn pending() -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse::new(200, r#"{"runtimeStatus":"Pending"}"#))
}

fn running() -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse::new(200, r#"{"runtimeStatus":"Running"}"#))
}

fn refused() -> Result<HttpResponse, TransportError> {
    Err(TransportError::Exhausted {
        method: HttpMethod::Get,
        url: "https://jobs.example.com/status/42".to_string(),
        attempts: 3,
        message: "connection refused".to_string(),
    })
}

struct Harness {
    store: Arc<InMemoryWorkflowEventStore>,
    executor: WorkflowExecutor<InMemoryWorkflowEventStore>,
    client: Arc<ScriptedClient>,
    check: CheckStatusActivity,
    fire: FireActionActivity,
}

impl Harness {
    fn new(client: ScriptedClient) -> Self {
        Self::resume(Arc::new(InMemoryWorkflowEventStore::new()), Arc::new(client))
    }

    /// A harness whose executor keeps at most `max_events` per run
    fn with_event_limit(client: ScriptedClient, max_events: usize) -> Self {
        Self::build(
            Arc::new(InMemoryWorkflowEventStore::new()),
            Arc::new(client),
            ExecutorConfig {
                max_events_per_workflow: max_events,
            },
        )
    }

    /// A fresh executor over an existing store, as after a process restart
    fn resume(store: Arc<InMemoryWorkflowEventStore>, client: Arc<ScriptedClient>) -> Self {
        Self::build(store, client, ExecutorConfig::default())
    }

    fn build(
        store: Arc<InMemoryWorkflowEventStore>,
        client: Arc<ScriptedClient>,
        config: ExecutorConfig,
    ) -> Self {
        let mut executor = WorkflowExecutor::from_shared(Arc::clone(&store), config);
        executor.register::<PollingWorkflow>();
        let http: Arc<dyn HttpClient> = client.clone();
        Self {
            store,
            executor,
            check: CheckStatusActivity::new(Arc::clone(&http)),
            fire: FireActionActivity::new(http),
            client,
        }
    }

    async fn start(&self, request: PollRequest) -> Uuid {
        self.executor
            .start_workflow::<PollingWorkflow>(request)
            .await
            .unwrap()
    }

    /// Fire the next pending timer without running the activity it schedules
    async fn fire_timer(&self) -> Option<(String, Duration)> {
        let timers = self
            .store
            .claim_due_timers(DateTime::<Utc>::MAX_UTC, 10)
            .await
            .unwrap();
        assert!(timers.len() <= 1, "a run never waits on two timers");
        let timer = timers.into_iter().next()?;

        let duration = self
            .executor
            .history(timer.workflow_id)
            .await
            .unwrap()
            .iter()
            .rev()
            .find_map(|event| match event {
                WorkflowEvent::TimerStarted {
                    timer_id,
                    duration_ms,
                    ..
                } if *timer_id == timer.timer_id => Some(Duration::from_millis(*duration_ms)),
                _ => None,
            })
            .expect("fired timer has a TimerStarted event");

        self.executor
            .on_timer_fired(timer.workflow_id, &timer.timer_id)
            .await
            .unwrap();
        Some((timer.timer_id, duration))
    }

    /// Execute queued activities until the run suspends or finishes
    async fn drain_tasks(&self) {
        let types = vec!["check_status".to_string(), "fire_action".to_string()];
        loop {
            let tasks = self.store.claim_task("harness", &types, 10).await.unwrap();
            if tasks.is_empty() {
                return;
            }

            for task in tasks {
                let ctx = ActivityContext::new(
                    task.workflow_id,
                    task.activity_id.clone(),
                    task.attempt,
                    task.max_attempts,
                );
                let request: PollRequest = serde_json::from_value(task.input.clone()).unwrap();
                let result = match task.activity_type.as_str() {
                    "check_status" => self
                        .check
                        .execute(&ctx, request)
                        .await
                        .map(|check| serde_json::to_value(check).unwrap()),
                    "fire_action" => self
                        .fire
                        .execute(&ctx, request)
                        .await
                        .map(|receipt| serde_json::to_value(receipt).unwrap()),
                    other => panic!("unexpected activity type {other}"),
                };

                match result {
                    Ok(value) => {
                        self.store.complete_task(task.id).await.unwrap();
                        self.executor
                            .on_activity_completed(task.workflow_id, &task.activity_id, value)
                            .await
                            .unwrap();
                    }
                    Err(error) => {
                        self.store
                            .fail_task(task.id, &error.message, false)
                            .await
                            .unwrap();
                        self.executor
                            .on_activity_failed(task.workflow_id, &task.activity_id, error, false)
                            .await
                            .unwrap();
                    }
                }
            }
        }
    }

    /// Fire timers and run activities until nothing is pending
    async fn run_to_end(&self) -> Vec<(String, Duration)> {
        let mut waits = Vec::new();
        while let Some(wait) = self.fire_timer().await {
            waits.push(wait);
            self.drain_tasks().await;
        }
        waits
    }

    async fn info(&self, run_id: Uuid) -> WorkflowInfo {
        self.executor.workflow_info(run_id).await.unwrap()
    }

    async fn summary(&self, run_id: Uuid) -> PollSummary {
        let info = self.info(run_id).await;
        assert_eq!(info.status, WorkflowStatus::Completed);
        serde_json::from_value(info.result.expect("completed run has a result")).unwrap()
    }
}

fn request(policy: RetryPolicy) -> PollRequest {
    PollRequest::new(
        Url::parse("https://jobs.example.com/status/42").unwrap(),
        Url::parse("https://hooks.example.com/ready").unwrap(),
    )
    .with_content(json!({"orderId": 42}))
    .with_retry_policy(policy)
}

fn scenario_policy() -> RetryPolicy {
    RetryPolicy::default()
        .with_initial_delay(5.0)
        .with_max_retries(3)
        .with_backoff_coefficient(1.0)
}

fn secs(values: &[u64]) -> Vec<Duration> {
    values.iter().map(|s| Duration::from_secs(*s)).collect()
}

#[test_log::test(tokio::test)]
async fn test_scenario_a_never_ready_exhausts_retries() {
    let harness = Harness::new(ScriptedClient::always_pending());
    let run_id = harness.start(request(scenario_policy())).await;

    let waits = harness.run_to_end().await;

    let ids: Vec<&str> = waits.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["poll-wait-1", "poll-wait-2", "poll-wait-3"]);
    let delays: Vec<Duration> = waits.iter().map(|(_, d)| *d).collect();
    assert_eq!(delays, secs(&[5, 10, 15]));

    assert_eq!(harness.client.count(HttpMethod::Get), 3);
    assert_eq!(harness.client.count(HttpMethod::Post), 0);
    assert_eq!(
        harness.summary(run_id).await,
        PollSummary {
            outcome: RunOutcome::RetriesExhausted,
            polls: 3,
            triggered: false,
        }
    );
}

#[test_log::test(tokio::test)]
async fn test_scenario_b_ready_on_second_attempt_triggers_once() {
    let harness = Harness::new(ScriptedClient::new(vec![pending(), running()]));
    let run_id = harness.start(request(scenario_policy())).await;

    let waits = harness.run_to_end().await;

    assert_eq!(waits.len(), 2);
    assert_eq!(harness.client.count(HttpMethod::Get), 2);
    assert_eq!(harness.client.count(HttpMethod::Post), 1);
    assert_eq!(
        harness.summary(run_id).await,
        PollSummary {
            outcome: RunOutcome::Triggered,
            polls: 2,
            triggered: true,
        }
    );
}

#[test_log::test(tokio::test)]
async fn test_scenario_c_transport_error_fails_run() {
    let harness = Harness::new(ScriptedClient::new(vec![refused()]));
    let run_id = harness.start(request(scenario_policy())).await;

    let waits = harness.run_to_end().await;

    assert_eq!(waits.len(), 1);
    assert_eq!(harness.client.count(HttpMethod::Get), 1);
    assert_eq!(harness.client.count(HttpMethod::Post), 0);

    let info = harness.info(run_id).await;
    assert_eq!(info.status, WorkflowStatus::Failed);
    let error = info.error.expect("failed run has an error");
    assert_eq!(error.code.as_deref(), Some(TRANSPORT_ERROR));
    assert!(error.message.contains("connection refused"));
}

#[test_log::test(tokio::test)]
async fn test_scenario_d_start_delay_precedes_regular_loop() {
    let harness = Harness::new(ScriptedClient::always_pending());
    let policy = RetryPolicy::default()
        .with_start_delay(15.0)
        .with_initial_delay(5.0)
        .with_max_retries(1);
    let run_id = harness.start(request(policy)).await;

    let waits = harness.run_to_end().await;

    assert_eq!(
        waits,
        vec![
            ("poll-wait-0".to_string(), Duration::from_secs(15)),
            ("poll-wait-1".to_string(), Duration::from_secs(5)),
        ]
    );
    assert_eq!(harness.client.count(HttpMethod::Get), 2);
    assert_eq!(harness.summary(run_id).await.outcome, RunOutcome::RetriesExhausted);
}

#[test_log::test(tokio::test)]
async fn test_zero_retries_with_start_delay_polls_once() {
    let harness = Harness::new(ScriptedClient::always_pending());
    let policy = RetryPolicy::default()
        .with_start_delay(2.0)
        .with_max_retries(0);
    let run_id = harness.start(request(policy)).await;

    let waits = harness.run_to_end().await;

    assert_eq!(waits, vec![("poll-wait-0".to_string(), Duration::from_secs(2))]);
    assert_eq!(harness.summary(run_id).await.polls, 1);
}

#[test_log::test(tokio::test)]
async fn test_raw_check_ready_triggers_with_content() {
    let harness = Harness::new(ScriptedClient::new(vec![
        Ok(HttpResponse::new(202, "")),
        Ok(HttpResponse::new(200, "not json")),
    ]));
    let run_id = harness
        .start(request(scenario_policy()).with_mode(PollMode::RawCheck))
        .await;

    harness.run_to_end().await;

    assert_eq!(harness.summary(run_id).await.outcome, RunOutcome::Triggered);
    let posts: Vec<String> = harness
        .client
        .calls
        .lock()
        .iter()
        .filter(|(m, _)| *m == HttpMethod::Post)
        .map(|(_, url)| url.clone())
        .collect();
    assert_eq!(posts, vec!["https://hooks.example.com/ready".to_string()]);
}

#[test_log::test(tokio::test)]
async fn test_unexpected_status_stops_without_trigger() {
    let harness = Harness::new(ScriptedClient::new(vec![Ok(HttpResponse::new(
        200,
        r#"{"runtimeStatus":"Terminated"}"#,
    ))]));
    let run_id = harness.start(request(scenario_policy())).await;

    harness.run_to_end().await;

    assert_eq!(harness.client.count(HttpMethod::Post), 0);
    assert_eq!(
        harness.summary(run_id).await.outcome,
        RunOutcome::Stopped {
            status: 200,
            detail: "unexpected runtimeStatus 'Terminated'".to_string(),
        }
    );
}

#[test_log::test(tokio::test)]
async fn test_rejected_trigger_fails_run() {
    let harness = Harness::new(
        ScriptedClient::new(vec![running()]).with_action(Ok(HttpResponse::new(503, "busy"))),
    );
    let run_id = harness.start(request(scenario_policy())).await;

    harness.run_to_end().await;

    assert_eq!(harness.client.count(HttpMethod::Post), 1);
    let info = harness.info(run_id).await;
    assert_eq!(info.status, WorkflowStatus::Failed);
    assert_eq!(
        info.error.and_then(|e| e.code).as_deref(),
        Some(TRIGGER_FAILED)
    );
}

#[test_log::test(tokio::test)]
async fn test_run_resumes_after_restart_with_same_decisions() {
    let store = Arc::new(InMemoryWorkflowEventStore::new());
    let client = Arc::new(ScriptedClient::new(vec![pending(), pending(), running()]));

    let run_id = {
        let first = Harness::resume(Arc::clone(&store), Arc::clone(&client));
        let run_id = first.start(request(scenario_policy())).await;
        first.fire_timer().await.unwrap();
        first.drain_tasks().await;
        run_id
    };

    let second = Harness::resume(Arc::clone(&store), Arc::clone(&client));
    let waits = second.run_to_end().await;

    let ids: Vec<&str> = waits.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["poll-wait-2", "poll-wait-3"]);
    assert_eq!(second.summary(run_id).await.polls, 3);
    assert_eq!(client.count(HttpMethod::Post), 1);

    // Replaying the finished history produces nothing new
    let replay = second.executor.process_workflow(run_id).await.unwrap();
    assert_eq!(replay.events_written, 0);
}

#[test_log::test(tokio::test)]
async fn test_duplicate_timer_fire_is_ignored() {
    let harness = Harness::new(ScriptedClient::always_pending());
    let run_id = harness.start(request(scenario_policy())).await;

    harness.fire_timer().await.unwrap();
    let again = harness
        .executor
        .on_timer_fired(run_id, "poll-wait-1")
        .await
        .unwrap();
    assert_eq!(again.events_written, 0);

    harness.drain_tasks().await;
    assert_eq!(harness.client.count(HttpMethod::Get), 1);
}

#[test_log::test(tokio::test)]
async fn test_cancel_only_between_attempts() {
    let harness = Harness::new(ScriptedClient::always_pending());
    let run_id = harness.start(request(scenario_policy())).await;

    // The status check is scheduled but has not reported back
    harness.fire_timer().await.unwrap();
    let err = harness
        .executor
        .cancel_workflow(run_id, "operator")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ExecutorError::ActivityInFlight { activity_id, .. } if activity_id == "check-status-1"
    ));

    // Once the run waits again it can be cancelled, and never polls again
    harness.drain_tasks().await;
    harness.executor.cancel_workflow(run_id, "operator").await.unwrap();
    assert!(harness.run_to_end().await.is_empty());
    assert_eq!(harness.info(run_id).await.status, WorkflowStatus::Cancelled);
    assert_eq!(harness.client.count(HttpMethod::Get), 1);
}

#[test_log::test(tokio::test)]
async fn test_run_past_event_limit_ends_failed() {
    let harness = Harness::with_event_limit(ScriptedClient::always_pending(), 10);
    let run_id = harness.start(request(scenario_policy())).await;

    let waits = harness.run_to_end().await;
    assert_eq!(waits.len(), 2);

    let info = harness.info(run_id).await;
    assert_eq!(info.status, WorkflowStatus::Failed);
    assert_eq!(
        info.error.and_then(|e| e.code).as_deref(),
        Some(EVENT_LIMIT_EXCEEDED)
    );
    assert_eq!(harness.client.count(HttpMethod::Get), 2);
    assert_eq!(harness.client.count(HttpMethod::Post), 0);
    assert_eq!(harness.store.pending_timer_count(), 0);

    let history = harness.executor.history(run_id).await.unwrap();
    assert_eq!(history.len(), 10);
    assert!(matches!(history.last(), Some(WorkflowEvent::WorkflowFailed { .. })));
}

#[test_log::test(tokio::test)]
async fn test_run_within_event_budget_completes() {
    let policy = scenario_policy();
    let budget = PollingWorkflow::event_budget(&policy);
    let harness = Harness::with_event_limit(
        ScriptedClient::new(vec![pending(), pending(), running()]),
        budget,
    );
    let run_id = harness.start(request(policy)).await;

    harness.run_to_end().await;

    let summary = harness.summary(run_id).await;
    assert_eq!(summary.outcome, RunOutcome::Triggered);
    assert_eq!(summary.polls, 3);
    assert_eq!(harness.executor.history(run_id).await.unwrap().len(), budget);
}
