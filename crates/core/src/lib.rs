//! # Timekeeper Core
//!
//! A durable retry/backoff polling orchestrator. A run waits, checks a
//! resource's status, and fires a follow-up action exactly once when the
//! resource is ready, giving up after a bounded number of attempts.
//!
//! ## Components
//!
//! - [`backoff`]: pure wait computation between attempts
//! - [`poller`]: one status check and its classification
//! - [`trigger`]: the one-shot follow-up call
//! - [`workflow`]: the state machine, run as a durable workflow
//! - [`service`]: start, inspect and cancel runs
//!
//! Outbound calls go through [`http::HttpClient`]; [`http::ReqwestHttpClient`]
//! adds transport-level retries that never count as poll attempts.

pub mod activities;
pub mod backoff;
pub mod http;
pub mod poller;
pub mod request;
pub mod service;
pub mod trigger;
pub mod workflow;

pub use activities::{CheckStatusActivity, FireActionActivity, TRANSPORT_ERROR, TRIGGER_FAILED};
pub use backoff::{first_delay, next_delay, MAX_TIMER_DELAY};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient, TransportError};
pub use poller::{classify, PollCheck, PollOutcome, StatusPoller};
pub use request::{PollMode, PollRequest, RetryPolicy, TransportOptions, ValidationError};
pub use service::{PollingService, RunStatus, ServiceError};
pub use trigger::{ActionTrigger, FireReceipt, TriggerError};
pub use workflow::{PollState, PollSummary, PollingWorkflow, RunOutcome};
