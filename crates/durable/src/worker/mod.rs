//! Worker pool for timer firing and task execution
//!
//! This module provides:
//! - [`WorkerPool`] - Fires due timers and executes activities concurrently
//! - [`TaskPoller`] - Claims timers and tasks with adaptive backoff
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ TaskPoller (due timers + pending tasks, backoff)     │   │
//! │  └──────┬──────────────────────────────┬────────────────┘   │
//! │         │ timers                       │ tasks              │
//! │         ▼                              ▼                    │
//! │  ┌──────────────────┐  ┌─────────────────────────────────┐  │
//! │  │ executor.on_     │  │ Task Executor (Semaphore-limited)│  │
//! │  │ timer_fired      │  │ [Task 1] [Task 2] ... [Task N]   │  │
//! │  └──────────────────┘  └─────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod poller;
mod pool;

pub use poller::{PollBatch, PollerConfig, PollerError, TaskPoller};
pub use pool::{
    ActivityHandler, ActivityResult, WorkerPool, WorkerPoolConfig, WorkerPoolError,
    WorkerPoolStatus, DELIVERY_FAILED,
};
