//! Eviction Order Module
//!
//! Tracks which key is next in line for size-based eviction.

use std::collections::VecDeque;
use std::str::FromStr;

// == Eviction Policy ==
/// How eviction order is maintained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Oldest `created_at` first; reads never change the order
    #[default]
    Fifo,
    /// Least recently read or written first
    Lru,
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(EvictionPolicy::Fifo),
            "lru" => Ok(EvictionPolicy::Lru),
            other => Err(format!("unknown eviction policy: {other}")),
        }
    }
}

// == Eviction Order ==
/// Keys ordered by a millisecond stamp.
///
/// - Front = oldest stamp (next eviction candidate)
/// - Back = newest stamp
///
/// Equal stamps keep the order they were recorded in.
#[derive(Debug, Default)]
pub struct EvictionOrder {
    order: VecDeque<(u64, String)>,
}

impl EvictionOrder {
    pub fn new() -> Self {
        Self {
            order: VecDeque::new(),
        }
    }

    // == Record ==
    /// Places `key` at the position for `stamp`, replacing any previous stamp.
    pub fn record(&mut self, key: &str, stamp: u64) {
        self.remove(key);
        // Stamps are almost always the newest, so this is usually the back.
        let pos = self.order.partition_point(|(s, _)| *s <= stamp);
        self.order.insert(pos, (stamp, key.to_string()));
    }

    // == Remove ==
    pub fn remove(&mut self, key: &str) {
        self.order.retain(|(_, k)| k != key);
    }

    // == Pop Oldest ==
    /// Returns and removes the key with the oldest stamp.
    pub fn pop_oldest(&mut self) -> Option<String> {
        self.order.pop_front().map(|(_, key)| key)
    }

    pub fn peek_oldest(&self) -> Option<&str> {
        self.order.front().map(|(_, key)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
    }
}
