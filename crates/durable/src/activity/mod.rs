//! Activity abstractions
//!
//! Activities are units of work that are executed by workers. They:
//! - Perform the side effects a workflow is not allowed to perform itself
//! - May fail and be retried according to the retry policy

mod context;
mod definition;

pub use context::ActivityContext;
pub use definition::{Activity, ActivityError};
