//! Read-only access to the key-value store holding the queues.
//!
//! The store is reached through the [`QueueStore`] trait so the probe can be
//! driven against an in-memory store in tests. [`RedisStore`] is the real
//! implementation; every call it makes is wrapped in [`retry_with_backoff`]
//! so transient connection and timeout failures are retried with
//! exponential backoff before they surface.

pub mod redis_store;
pub mod retry;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::StoreError;

pub use redis_store::RedisStore;
pub use retry::retry_with_backoff;

/// Read operations the probe issues against the store. Each call is one
/// round trip; none of them mutate data.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Lists every key in the selected database.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Returns the type name of a key (`list`, `hash`, `none`, ...).
    async fn key_type(&self, key: &str) -> Result<String, StoreError>;

    /// Returns the length of a list key (0 when missing).
    async fn llen(&self, key: &str) -> Result<usize, StoreError>;

    /// Returns the list element at `index`, or `None` past the end.
    async fn lindex(&self, key: &str, index: usize) -> Result<Option<Vec<u8>>, StoreError>;

    /// Returns every field of a hash key (empty when missing).
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;
}
