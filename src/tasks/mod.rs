//! Background Tasks Module
//!
//! Contains background tasks that run periodically alongside the cache.
//!
//! # Tasks
//! - Sweep: purges expired entries and re-applies the size cap

mod sweep;

pub use sweep::spawn_sweep_task;
