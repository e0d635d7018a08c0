//! Redis list-backed job queue.
//!
//! - `LPUSH queue job` to enqueue; consumers pop from the right.
//! - `BRPOPLPUSH queue queue:processing:<consumer> timeout` to dequeue.
//! - `LREM` on the processing list to acknowledge.
//! - `MULTI` { `LPUSH queue:dead entry`, `LREM` } to dead-letter.
//! - `LMOVE processing queue LEFT RIGHT` until empty to recover.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::{info, instrument};

use super::{
    DeadLetterEntry, Delivery, Job, JobQueue, QueueConnector, QueueError, dead_letter_key,
    processing_key,
};

/// Shortest blocking pop sent to the server; zero would block forever.
const MIN_POP_TIMEOUT_SECS: f64 = 0.01;

/// Map a Redis error onto the worker loop's recovery classes.
pub(crate) fn classify(err: redis::RedisError) -> QueueError {
    if err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_io_error()
        || err.is_timeout()
    {
        QueueError::Connection(err.to_string())
    } else if err.code() == Some("UNBLOCKED") || err.to_string().starts_with("UNBLOCKED") {
        QueueError::Interrupted(err.to_string())
    } else {
        QueueError::Command(err.to_string())
    }
}

#[derive(Clone)]
pub struct RedisJobQueue {
    conn: MultiplexedConnection,
}

impl std::fmt::Debug for RedisJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisJobQueue").finish_non_exhaustive()
    }
}

impl RedisJobQueue {
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        RedisQueueConnector::new(redis_url)?.connect().await
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    #[instrument(skip(self, job), fields(job_id = %job.id), err)]
    async fn enqueue(&self, queue: &str, job: &Job) -> Result<(), QueueError> {
        let raw = job.to_json()?;
        let mut conn = self.conn.clone();
        redis::cmd("LPUSH")
            .arg(queue)
            .arg(raw)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn dequeue(
        &self,
        queue: &str,
        consumer: &str,
        timeout: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(queue)
            .arg(processing_key(queue, consumer))
            .arg(timeout.as_secs_f64().max(MIN_POP_TIMEOUT_SECS))
            .query_async(&mut conn)
            .await
            .map_err(classify)?;

        Ok(raw.map(|raw| Delivery {
            queue: queue.to_string(),
            consumer: consumer.to_string(),
            raw,
        }))
    }

    #[instrument(skip(self, delivery), fields(queue = %delivery.queue), err)]
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("LREM")
            .arg(processing_key(&delivery.queue, &delivery.consumer))
            .arg(1)
            .arg(&delivery.raw)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(classify)?;
        Ok(())
    }

    #[instrument(skip(self, delivery), fields(queue = %delivery.queue), err)]
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        let entry = DeadLetterEntry::new(delivery.raw.clone(), reason, delivery.consumer.clone());
        let entry = serde_json::to_string(&entry)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("LPUSH")
            .arg(dead_letter_key(&delivery.queue))
            .arg(entry)
            .ignore()
            .cmd("LREM")
            .arg(processing_key(&delivery.queue, &delivery.consumer))
            .arg(1)
            .arg(&delivery.raw)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(classify)
    }

    #[instrument(skip(self), err)]
    async fn recover(&self, queue: &str, consumer: &str) -> Result<usize, QueueError> {
        let source = processing_key(queue, consumer);
        let mut conn = self.conn.clone();
        let mut moved = 0;

        loop {
            let next: Option<String> = redis::cmd("LMOVE")
                .arg(&source)
                .arg(queue)
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await
                .map_err(classify)?;
            if next.is_none() {
                break;
            }
            moved += 1;
        }

        if moved > 0 {
            info!(queue, consumer, moved, "requeued unacknowledged jobs");
        }
        Ok(moved)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(classify)?;
        Ok(())
    }
}

/// Opens multiplexed connections to one Redis database.
#[derive(Debug, Clone)]
pub struct RedisQueueConnector {
    client: redis::Client,
}

impl RedisQueueConnector {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl QueueConnector for RedisQueueConnector {
    type Queue = RedisJobQueue;

    async fn connect(&self) -> Result<Self::Queue, QueueError> {
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        Ok(RedisJobQueue { conn })
    }
}
