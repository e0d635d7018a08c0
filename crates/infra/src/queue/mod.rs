//! Durable FIFO job queues with acknowledged delivery.
//!
//! ## Delivery model
//!
//! - Producers append to the head of a named list; consumers take from the tail
//!   (strict FIFO per queue, no ordering across queues).
//! - `dequeue` atomically moves the job into the consumer's own processing
//!   list, so no two consumers ever receive the same job.
//! - The consumer calls `ack` once the job is finished, or `dead_letter` when
//!   processing failed; both remove it from the processing list.
//! - A consumer that crashed between `dequeue` and `ack` calls `recover` on
//!   restart, which puts its unfinished jobs back at the consuming end.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod job;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use job::{ChatJob, CollectDataJob, DeadLetterEntry, Job, SuggestionJob};
pub use memory::InMemoryJobQueue;
#[cfg(feature = "redis")]
pub use self::redis::{RedisJobQueue, RedisQueueConnector};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The queue service is unreachable or the connection dropped.
    #[error("queue connection error: {0}")]
    Connection(String),

    /// A blocking pop was forcibly interrupted; safe to poll again.
    #[error("blocking pop interrupted: {0}")]
    Interrupted(String),

    #[error("queue command failed: {0}")]
    Command(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl QueueError {
    pub fn is_connection(&self) -> bool {
        matches!(self, QueueError::Connection(_))
    }
}

/// A job taken by one consumer and not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub queue: String,
    pub consumer: String,
    /// Serialized job exactly as stored.
    pub raw: String,
}

impl Delivery {
    pub fn job(&self) -> Result<Job, QueueError> {
        Job::from_json(&self.raw)
    }
}

/// Name of the list holding `consumer`'s unacknowledged jobs.
pub fn processing_key(queue: &str, consumer: &str) -> String {
    format!("{queue}:processing:{consumer}")
}

/// Name of the list holding failed jobs of `queue`.
pub fn dead_letter_key(queue: &str) -> String {
    format!("{queue}:dead")
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append to the named queue. Never blocks on consumers.
    async fn enqueue(&self, queue: &str, job: &Job) -> Result<(), QueueError>;

    /// Take the oldest job, waiting up to `timeout`. `Ok(None)` on timeout.
    async fn dequeue(
        &self,
        queue: &str,
        consumer: &str,
        timeout: Duration,
    ) -> Result<Option<Delivery>, QueueError>;

    /// Mark a delivery as finished.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Move a delivery to the queue's dead-letter list.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError>;

    /// Requeue `consumer`'s unacknowledged jobs; returns how many were moved.
    async fn recover(&self, queue: &str, consumer: &str) -> Result<usize, QueueError>;

    /// Idempotent health probe.
    async fn ping(&self) -> Result<(), QueueError>;
}

/// Opens queue handles; the worker loop reconnects through it.
#[async_trait]
pub trait QueueConnector: Send + Sync {
    type Queue: JobQueue + 'static;

    async fn connect(&self) -> Result<Self::Queue, QueueError>;
}

#[async_trait]
impl<Q: JobQueue + ?Sized> JobQueue for std::sync::Arc<Q> {
    async fn enqueue(&self, queue: &str, job: &Job) -> Result<(), QueueError> {
        (**self).enqueue(queue, job).await
    }

    async fn dequeue(
        &self,
        queue: &str,
        consumer: &str,
        timeout: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        (**self).dequeue(queue, consumer, timeout).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        (**self).ack(delivery).await
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        (**self).dead_letter(delivery, reason).await
    }

    async fn recover(&self, queue: &str, consumer: &str) -> Result<usize, QueueError> {
        (**self).recover(queue, consumer).await
    }

    async fn ping(&self) -> Result<(), QueueError> {
        (**self).ping().await
    }
}
