//! Cache Module
//!
//! Dual-tier cache: an in-memory map in front of a persistent key-value
//! store, with TTL expiration and size-based eviction.

mod clock;
mod entry;
mod order;
mod persist;
mod stats;
mod store;


// Re-export public types
pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{CacheEntry, SetOptions};
pub use order::{EvictionOrder, EvictionPolicy};
pub use persist::{
    JsonFileStore, MemoryBackingStore, PersistAction, PersistenceHook, PersistentStore,
    TracingHook,
};
pub use stats::CacheStats;
pub use store::{CacheStore, CacheStoreBuilder, StoreConfig, DEFAULT_NAMESPACE};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;
