//! Write-once result cache with per-entry time to live.
//!
//! Workers store a finished answer under the request id; front ends poll it.
//! An entry is visible strictly before `put time + ttl` and gone from then on.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::InMemoryResultCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisResultCache;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    Connection(String),

    #[error("cache command failed: {0}")]
    Command(String),
}

#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Store `value` under `key` unless an unexpired value is already there.
    ///
    /// Returns `false` when the existing value was kept.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError>;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

#[async_trait]
impl<C: ResultCache + ?Sized> ResultCache for std::sync::Arc<C> {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        (**self).put(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        (**self).get(key).await
    }

    async fn ping(&self) -> Result<(), CacheError> {
        (**self).ping().await
    }
}
