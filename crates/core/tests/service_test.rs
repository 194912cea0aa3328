//! Poll runs through the worker pool against a real HTTP server
//!
//! Run with: cargo test -p timekeeper-core --test service_test

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use url::Url;
use uuid::Uuid;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use timekeeper_core::{
    PollRequest, PollingService, ReqwestHttpClient, RetryPolicy, RunOutcome, RunStatus,
    TransportOptions, TRANSPORT_ERROR,
};
use timekeeper_durable::prelude::{InMemoryWorkflowEventStore, WorkerPoolConfig, WorkflowStatus};
use timekeeper_durable::worker::PollerConfig;

fn service() -> PollingService<InMemoryWorkflowEventStore> {
    PollingService::new(
        Arc::new(InMemoryWorkflowEventStore::new()),
        Arc::new(ReqwestHttpClient::new()),
        WorkerPoolConfig::new().with_poller(
            PollerConfig::new()
                .with_min_interval(Duration::from_millis(5))
                .with_max_interval(Duration::from_millis(20)),
        ),
    )
}

fn request(server: &MockServer) -> PollRequest {
    PollRequest::new(
        Url::parse(&format!("{}/status/42", server.uri())).unwrap(),
        Url::parse(&format!("{}/action", server.uri())).unwrap(),
    )
    .with_content(json!({"orderId": 42}))
    .with_retry_policy(
        RetryPolicy::default()
            .with_initial_delay(0.02)
            .with_backoff_coefficient(1.0)
            .with_max_retries(5),
    )
    .with_transport(
        TransportOptions::default()
            .with_first_retry_interval(0.01)
            .with_max_attempts(2)
            .with_timeout(2.0),
    )
}

async fn wait_until_finished(
    service: &PollingService<InMemoryWorkflowEventStore>,
    run_id: Uuid,
) -> RunStatus {
    for _ in 0..500 {
        let status = service.status(run_id).await.unwrap();
        if status.status != WorkflowStatus::Running {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {run_id} never finished");
}

#[test_log::test(tokio::test)]
async fn test_pending_then_ready_fires_action_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status/42"))
        .respond_with(ResponseTemplate::new(202))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/status/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"runtimeStatus": "Running"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/action"))
        .and(body_json(json!({"orderId": 42})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let service = service();
    service.run().unwrap();

    let run_id = service.start(request(&server)).await.unwrap();
    let status = wait_until_finished(&service, run_id).await;

    assert_eq!(status.status, WorkflowStatus::Completed);
    let output = status.output.unwrap();
    assert_eq!(output.outcome, RunOutcome::Triggered);
    assert_eq!(output.polls, 2);
    assert!(output.triggered);

    service.shutdown().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_server_errors_exhaust_transport_then_stop() {
    let server = MockServer::start().await;
    // Two transport attempts, both 503, then the final response is classified
    Mock::given(method("GET"))
        .and(path("/status/42"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let service = service();
    service.run().unwrap();

    let run_id = service.start(request(&server)).await.unwrap();
    let status = wait_until_finished(&service, run_id).await;

    assert_eq!(status.status, WorkflowStatus::Completed);
    assert_eq!(
        status.output.map(|o| o.outcome),
        Some(RunOutcome::Stopped {
            status: 503,
            detail: "unexpected status code 503".to_string(),
        })
    );

    service.shutdown().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_unreachable_status_endpoint_fails_run() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let service = service();
    service.run().unwrap();

    let request = PollRequest::new(
        Url::parse(&format!("http://{addr}/status")).unwrap(),
        Url::parse(&format!("http://{addr}/action")).unwrap(),
    )
    .with_retry_policy(RetryPolicy::default().with_initial_delay(0.01))
    .with_transport(
        TransportOptions::single_attempt().with_timeout(1.0),
    );

    let run_id = service.start(request).await.unwrap();
    let status = wait_until_finished(&service, run_id).await;

    assert_eq!(status.status, WorkflowStatus::Failed);
    assert_eq!(
        status.error.and_then(|e| e.code).as_deref(),
        Some(TRANSPORT_ERROR)
    );

    service.shutdown().await.unwrap();
}
