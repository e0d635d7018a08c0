//! Per-user bounded conversation log.
//!
//! Newest entry at the head; after every append the log is truncated to its
//! capacity. Reads return the most recent `k` entries oldest-first.

use async_trait::async_trait;
use thiserror::Error;

use healthcast_core::{HistoryEntry, Role, UserId};

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::InMemoryHistoryLog;
#[cfg(feature = "redis")]
pub use self::redis::RedisHistoryLog;

/// Entries kept per user unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 10;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("history connection error: {0}")]
    Connection(String),

    #[error("history command failed: {0}")]
    Command(String),

    #[error("corrupt history entry: {0}")]
    Serialization(String),
}

pub fn history_key(user: UserId) -> String {
    format!("chat_history:{user}")
}

#[async_trait]
pub trait HistoryLog: Send + Sync {
    async fn append(&self, user: UserId, role: Role, content: &str) -> Result<(), HistoryError>;

    /// Up to `k` most recent entries, oldest first. `k` is clamped to capacity.
    async fn recent(&self, user: UserId, k: usize) -> Result<Vec<HistoryEntry>, HistoryError>;

    async fn flush(&self, user: UserId) -> Result<(), HistoryError>;

    async fn ping(&self) -> Result<(), HistoryError>;
}

#[async_trait]
impl<H: HistoryLog + ?Sized> HistoryLog for std::sync::Arc<H> {
    async fn append(&self, user: UserId, role: Role, content: &str) -> Result<(), HistoryError> {
        (**self).append(user, role, content).await
    }

    async fn recent(&self, user: UserId, k: usize) -> Result<Vec<HistoryEntry>, HistoryError> {
        (**self).recent(user, k).await
    }

    async fn flush(&self, user: UserId) -> Result<(), HistoryError> {
        (**self).flush(user).await
    }

    async fn ping(&self) -> Result<(), HistoryError> {
        (**self).ping().await
    }
}
