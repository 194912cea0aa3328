//! Reliability patterns for durable execution
//!
//! This module provides [`RetryPolicy`], used both for activity scheduling
//! options and for transport-level retries inside activity implementations.

mod retry;

pub use retry::RetryPolicy;
