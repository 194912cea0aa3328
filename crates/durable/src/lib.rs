//! # Durable Execution Engine
//!
//! An event-sourced workflow substrate for long-running, interruption-tolerant
//! orchestrations.
//!
//! ## Features
//!
//! - **Event-sourced workflows**: every decision is persisted as an event, enabling replay and recovery
//! - **Durable timers**: a workflow suspends on a persisted deadline and resumes exactly once
//! - **Determinism checks**: replay verifies that recorded commands are produced again
//! - **Task queue**: activities are executed by a semaphore-bounded worker pool
//! - **Transport retries**: configurable retry policies with exponential backoff and jitter
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowExecutor                        │
//! │  (drives workflow state machines, handles event replay)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   WorkflowEventStore                         │
//! │  (workflow instances, event log, task queue, timers)        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkerPool                              │
//! │  (fires due timers, claims tasks, executes activities)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use timekeeper_durable::prelude::*;
//!
//! impl Workflow for ReminderWorkflow {
//!     const TYPE: &'static str = "reminder";
//!     type Input = ReminderInput;
//!     type Output = ReminderOutput;
//!
//!     fn new(input: Self::Input) -> Self {
//!         Self { input, sent: false }
//!     }
//!
//!     fn on_start(&mut self, _ctx: &WorkflowContext) -> Vec<WorkflowAction> {
//!         vec![WorkflowAction::timer("remind", Duration::from_secs(3600))]
//!     }
//!
//!     // ... implement other trait methods
//! }
//! ```

pub mod activity;
pub mod engine;
pub mod persistence;
pub mod reliability;
pub mod worker;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::activity::{Activity, ActivityContext, ActivityError};
    pub use crate::engine::{
        ExecutorConfig, ExecutorError, ProcessResult, WorkflowExecutor, WorkflowRegistry,
        EVENT_LIMIT_EXCEEDED,
    };
    pub use crate::persistence::{
        ClaimedTask, DueTimer, InMemoryWorkflowEventStore, StoreError, TaskDefinition,
        WorkflowEventStore, WorkflowInfo, WorkflowStatus,
    };
    pub use crate::reliability::RetryPolicy;
    pub use crate::worker::{WorkerPool, WorkerPoolConfig, WorkerPoolError, DELIVERY_FAILED};
    pub use crate::workflow::{
        ActivityOptions, Workflow, WorkflowAction, WorkflowContext, WorkflowError, WorkflowEvent,
    };
}

// Re-export key types at crate root
pub use activity::{Activity, ActivityContext, ActivityError};
pub use engine::{ExecutorConfig, ExecutorError, ProcessResult, WorkflowExecutor, WorkflowRegistry};
pub use persistence::{
    InMemoryWorkflowEventStore, StoreError, WorkflowEventStore, WorkflowInfo, WorkflowStatus,
};
pub use reliability::RetryPolicy;
pub use worker::{WorkerPool, WorkerPoolConfig, WorkerPoolError};
pub use workflow::{
    ActivityOptions, Workflow, WorkflowAction, WorkflowContext, WorkflowError, WorkflowEvent,
};
