//! Persistence layer for durable execution
//!
//! This module provides:
//! - [`WorkflowEventStore`] trait for workflow, event, task and timer persistence
//! - [`InMemoryWorkflowEventStore`] for single-process deployments and tests

mod memory;
mod store;

pub use memory::InMemoryWorkflowEventStore;
pub use store::{
    ClaimedTask, DueTimer, StoreError, TaskDefinition, TaskFailureOutcome, TaskStatus,
    WorkflowEventStore, WorkflowInfo, WorkflowStatus,
};
