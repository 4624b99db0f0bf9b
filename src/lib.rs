//! Resilient Cache - a dual-tier TTL cache with resilient loading
//!
//! A bounded in-memory tier sits in front of a pluggable persistent tier.
//! Loads go through single-flight deduplication and retry with exponential
//! backoff; batches run under a concurrency limit.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod manager;
pub mod models;
pub mod network;
pub mod tasks;

pub use api::AppState;
pub use cache::{CacheStore, JsonFileStore, MemoryBackingStore, PersistentStore, SetOptions};
pub use config::Config;
pub use error::{CacheError, Retryable};
pub use manager::{CacheManager, LoadOptions};
pub use network::{execute_with_retry, ConcurrencyLimiter, RequestDeduplicator, RetryPolicy};
pub use tasks::spawn_sweep_task;
