//! Caching contract and the sharded implementation.
//!
//! Query-result and placeholder caching depend only on [`Cache`];
//! [`ShardedCache`] is the in-process implementation.

pub mod sharded;

use thiserror::Error;

pub use sharded::{ShardStats, ShardedCache, ShardedCacheStats, DEFAULT_LRU_CAPACITY, MAX_SHARDS};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Key → string-sequence cache.
///
/// Reads and writes never fail; only `delete` may report a backend problem
/// (the in-process cache never does).
pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<String>>;
    fn set(&self, key: &str, value: Vec<String>);
    fn delete(&self, key: &str) -> Result<(), CacheError>;
}
