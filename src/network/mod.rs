//! Network Module
//!
//! Hardening primitives for remote calls: single-flight deduplication,
//! retry with exponential backoff, and bounded-concurrency batches.
//! None of them perform I/O themselves; they wrap caller-supplied futures.

mod dedup;
mod limiter;
mod retry;

pub use dedup::RequestDeduplicator;
pub use limiter::{run_bounded, ConcurrencyLimiter};
pub use retry::{execute_with_retry, RetryPolicy, RetryPredicate};
