//! Analysis modules.
//!
//! Per-log analysis with bounded retry, and weekly aggregation.

pub mod aggregator;
pub mod analyzer;
pub mod retry;

pub use aggregator::Aggregator;
pub use analyzer::Analyzer;
pub use retry::{RetryPolicy, RetryingCaller};
