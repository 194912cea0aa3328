//! The polling state machine
//!
//! ```text
//! Idle ──► Waiting ──timer──► Polling ──KeepPolling──► Waiting
//!                                │
//!                                ├──TriggerAndStop──► Triggering ──► Done (triggered)
//!                                ├──Stop────────────► Done (stopped)
//!                                ├──attempts spent──► Done (retries exhausted)
//!                                └──transport error─► Failed
//! ```
//!
//! Every wait is a durable timer (`poll-wait-{attempt}`), every status check
//! a `check_status` activity (`check-status-{attempt}`) and the follow-up a
//! single `fire_action` activity (`fire-action`). The workflow reads nothing
//! but its request and recorded activity results, so replay reproduces the
//! same timers and activities.

use serde::{Deserialize, Serialize};
use timekeeper_durable::prelude::{
    Activity, ActivityError, ActivityOptions, RetryPolicy as ActivityRetryPolicy, Workflow,
    WorkflowAction, WorkflowContext, WorkflowError,
};
use tracing::{error, info, warn};

use crate::activities::{CheckStatusActivity, FireActionActivity, TRANSPORT_ERROR, TRIGGER_FAILED};
use crate::backoff::{first_delay, next_delay};
use crate::poller::{PollCheck, PollOutcome};
use crate::request::{PollRequest, RetryPolicy};

/// Activity ID of the follow-up action
pub const FIRE_ACTION_ID: &str = "fire-action";

/// Timer ID of the wait preceding an attempt
pub fn wait_timer_id(attempt: u32) -> String {
    format!("poll-wait-{attempt}")
}

/// Activity ID of the status check of an attempt
pub fn check_activity_id(attempt: u32) -> String {
    format!("check-status-{attempt}")
}

/// How a finished run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The resource became ready and the action was delivered
    Triggered,

    /// A status check returned something unexpected
    Stopped { status: u16, detail: String },

    /// Still pending after the last allowed attempt
    RetriesExhausted,
}

/// Output of a completed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSummary {
    pub outcome: RunOutcome,

    /// Status checks performed
    pub polls: u32,

    /// Whether the action endpoint accepted the call
    pub triggered: bool,
}

/// Where the state machine currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Waiting { attempt: u32 },
    Polling { attempt: u32 },
    Triggering { attempt: u32 },
    Done,
    Failed,
}

/// Durable workflow driving one poll run
pub struct PollingWorkflow {
    request: PollRequest,
    state: PollState,
    polls: u32,
    summary: Option<PollSummary>,
    error: Option<WorkflowError>,
}

impl PollingWorkflow {
    /// Current state
    pub fn state(&self) -> PollState {
        self.state
    }

    /// Status checks performed so far
    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// Most history events a run under `policy` can write
    ///
    /// Each poll records its timer start, the firing, the check schedule and
    /// the check result. The run adds its start event, the trigger pair and a
    /// terminal event.
    pub fn event_budget(policy: &RetryPolicy) -> usize {
        const PER_POLL: usize = 4;
        const FIXED: usize = 4;
        usize::try_from(policy.max_polls())
            .unwrap_or(usize::MAX)
            .saturating_mul(PER_POLL)
            .saturating_add(FIXED)
    }

    fn wait(&mut self, ctx: &WorkflowContext, attempt: u32) -> Vec<WorkflowAction> {
        let delay = next_delay(attempt, &self.request.retry_policy);
        self.state = PollState::Waiting { attempt };
        if !ctx.is_replaying() {
            info!(
                workflow_id = %ctx.workflow_id(),
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "waiting before status check"
            );
        }
        vec![WorkflowAction::timer(wait_timer_id(attempt), delay)]
    }

    fn schedule(
        &mut self,
        ctx: &WorkflowContext,
        activity_id: String,
        activity_type: &str,
    ) -> Vec<WorkflowAction> {
        let options = ActivityOptions::default()
            .with_retry(ActivityRetryPolicy::no_retry())
            .with_start_to_close_timeout(self.request.transport.call_budget());

        match serde_json::to_value(&self.request) {
            Ok(input) => vec![
                WorkflowAction::schedule_activity(activity_id, activity_type, input)
                    .with_options(options),
            ],
            Err(e) => self.fail(
                ctx,
                WorkflowError::new(format!("request cannot be serialized: {e}"))
                    .with_code("INVALID_REQUEST"),
            ),
        }
    }

    fn finish(&mut self, ctx: &WorkflowContext, outcome: RunOutcome) -> Vec<WorkflowAction> {
        let summary = PollSummary {
            triggered: outcome == RunOutcome::Triggered,
            outcome,
            polls: self.polls,
        };

        if !ctx.is_replaying() {
            match &summary.outcome {
                RunOutcome::Triggered => {
                    info!(workflow_id = %ctx.workflow_id(), polls = summary.polls, "run done: action triggered")
                }
                RunOutcome::Stopped { status, detail } => warn!(
                    workflow_id = %ctx.workflow_id(),
                    polls = summary.polls,
                    status,
                    %detail,
                    "run done: stopped on unexpected status"
                ),
                RunOutcome::RetriesExhausted => warn!(
                    workflow_id = %ctx.workflow_id(),
                    polls = summary.polls,
                    "run done: retries exhausted while still pending"
                ),
            }
        }

        match serde_json::to_value(&summary) {
            Ok(result) => {
                self.state = PollState::Done;
                self.summary = Some(summary);
                vec![WorkflowAction::complete(result)]
            }
            Err(e) => self.fail(
                ctx,
                WorkflowError::new(format!("summary cannot be serialized: {e}")),
            ),
        }
    }

    fn fail(&mut self, ctx: &WorkflowContext, failure: WorkflowError) -> Vec<WorkflowAction> {
        if !ctx.is_replaying() {
            error!(workflow_id = %ctx.workflow_id(), polls = self.polls, error = %failure, "run failed");
        }
        self.state = PollState::Failed;
        self.error = Some(failure.clone());
        vec![WorkflowAction::fail(failure)]
    }

    fn on_check(&mut self, ctx: &WorkflowContext, attempt: u32, check: PollCheck) -> Vec<WorkflowAction> {
        self.polls += 1;
        if !ctx.is_replaying() {
            info!(
                workflow_id = %ctx.workflow_id(),
                attempt,
                status = check.status,
                outcome = ?check.outcome,
                detail = %check.detail,
                "status classified"
            );
        }

        match check.outcome {
            PollOutcome::KeepPolling if attempt < self.request.retry_policy.max_retries => {
                self.wait(ctx, attempt + 1)
            }
            PollOutcome::KeepPolling => self.finish(ctx, RunOutcome::RetriesExhausted),
            PollOutcome::TriggerAndStop => {
                self.state = PollState::Triggering { attempt };
                self.schedule(ctx, FIRE_ACTION_ID.to_string(), FireActionActivity::TYPE)
            }
            PollOutcome::Stop => self.finish(
                ctx,
                RunOutcome::Stopped {
                    status: check.status,
                    detail: check.detail,
                },
            ),
        }
    }

    fn ignore(&self, ctx: &WorkflowContext, what: &str, id: &str) -> Vec<WorkflowAction> {
        if !ctx.is_replaying() {
            warn!(workflow_id = %ctx.workflow_id(), state = ?self.state, id, "ignoring unexpected {what}");
        }
        vec![]
    }
}

impl Workflow for PollingWorkflow {
    const TYPE: &'static str = "polling_workflow";
    type Input = PollRequest;
    type Output = PollSummary;

    fn new(input: Self::Input) -> Self {
        Self {
            request: input,
            state: PollState::Idle,
            polls: 0,
            summary: None,
            error: None,
        }
    }

    fn on_start(&mut self, ctx: &WorkflowContext) -> Vec<WorkflowAction> {
        let policy = &self.request.retry_policy;
        if !ctx.is_replaying() {
            info!(
                workflow_id = %ctx.workflow_id(),
                status_check_url = %self.request.status_check_url,
                mode = %self.request.mode,
                max_retries = policy.max_retries,
                "poll run started"
            );
        }

        let (attempt, _) = first_delay(policy);
        if attempt == 1 && policy.max_retries == 0 {
            return self.finish(ctx, RunOutcome::RetriesExhausted);
        }
        self.wait(ctx, attempt)
    }

    fn on_timer_fired(&mut self, ctx: &WorkflowContext, timer_id: &str) -> Vec<WorkflowAction> {
        match self.state {
            PollState::Waiting { attempt } if timer_id == wait_timer_id(attempt) => {
                self.state = PollState::Polling { attempt };
                if !ctx.is_replaying() {
                    info!(workflow_id = %ctx.workflow_id(), attempt, "checking status");
                }
                self.schedule(ctx, check_activity_id(attempt), CheckStatusActivity::TYPE)
            }
            _ => self.ignore(ctx, "timer", timer_id),
        }
    }

    fn on_activity_completed(
        &mut self,
        ctx: &WorkflowContext,
        activity_id: &str,
        result: serde_json::Value,
    ) -> Vec<WorkflowAction> {
        match self.state {
            PollState::Polling { attempt } if activity_id == check_activity_id(attempt) => {
                match serde_json::from_value::<PollCheck>(result) {
                    Ok(check) => self.on_check(ctx, attempt, check),
                    Err(e) => self.fail(
                        ctx,
                        WorkflowError::new(format!("unreadable status check result: {e}"))
                            .with_code("INVALID_RESULT"),
                    ),
                }
            }
            PollState::Triggering { .. } if activity_id == FIRE_ACTION_ID => {
                self.finish(ctx, RunOutcome::Triggered)
            }
            _ => self.ignore(ctx, "activity result", activity_id),
        }
    }

    fn on_activity_failed(
        &mut self,
        ctx: &WorkflowContext,
        activity_id: &str,
        error: &ActivityError,
    ) -> Vec<WorkflowAction> {
        match self.state {
            PollState::Polling { attempt } if activity_id == check_activity_id(attempt) => {
                self.polls += 1;
                self.fail(
                    ctx,
                    WorkflowError::new(format!("status check failed: {}", error.message))
                        .with_code(TRANSPORT_ERROR),
                )
            }
            PollState::Triggering { .. } if activity_id == FIRE_ACTION_ID => self.fail(
                ctx,
                WorkflowError::new(format!("action call failed: {}", error.message))
                    .with_code(TRIGGER_FAILED),
            ),
            _ => self.ignore(ctx, "activity failure", activity_id),
        }
    }

    fn is_completed(&self) -> bool {
        matches!(self.state, PollState::Done | PollState::Failed)
    }

    fn result(&self) -> Option<Self::Output> {
        self.summary.clone()
    }

    fn error(&self) -> Option<WorkflowError> {
        self.error.clone()
    }
}
