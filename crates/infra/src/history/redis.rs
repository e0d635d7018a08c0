use async_trait::async_trait;
use redis::FromRedisValue;
use tracing::instrument;

use healthcast_core::{HistoryEntry, Role, UserId};

use crate::redis_conn::{LazyConnection, is_transport};

use super::{DEFAULT_CAPACITY, HistoryError, HistoryLog, history_key};

/// One Redis list per user, newest at the head.
#[derive(Debug)]
pub struct RedisHistoryLog {
    conn: LazyConnection,
    capacity: usize,
}

impl RedisHistoryLog {
    pub fn new(redis_url: &str) -> Result<Self, HistoryError> {
        Self::with_capacity(redis_url, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(redis_url: &str, capacity: usize) -> Result<Self, HistoryError> {
        let conn = LazyConnection::open(redis_url)
            .map_err(|e| HistoryError::Connection(e.to_string()))?;
        Ok(Self {
            conn,
            capacity: capacity.max(1),
        })
    }

    async fn run<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T, HistoryError> {
        let result = match self.conn.get().await {
            Ok(mut conn) => cmd.query_async(&mut conn).await,
            Err(e) => Err(e),
        };
        self.settle(result).await
    }

    async fn run_atomic(&self, pipe: &redis::Pipeline) -> Result<(), HistoryError> {
        let result = match self.conn.get().await {
            Ok(mut conn) => pipe.query_async(&mut conn).await,
            Err(e) => Err(e),
        };
        self.settle(result).await
    }

    async fn settle<T>(&self, result: redis::RedisResult<T>) -> Result<T, HistoryError> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                self.conn.observe(&err).await;
                Err(if is_transport(&err) {
                    HistoryError::Connection(err.to_string())
                } else {
                    HistoryError::Command(err.to_string())
                })
            }
        }
    }
}

#[async_trait]
impl HistoryLog for RedisHistoryLog {
    #[instrument(skip(self, content), err)]
    async fn append(&self, user: UserId, role: Role, content: &str) -> Result<(), HistoryError> {
        let key = history_key(user);
        let entry = serde_json::to_string(&HistoryEntry::new(role, content))
            .map_err(|e| HistoryError::Serialization(e.to_string()))?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("LPUSH")
            .arg(&key)
            .arg(entry)
            .ignore()
            .cmd("LTRIM")
            .arg(&key)
            .arg(0)
            .arg(self.capacity as i64 - 1)
            .ignore();
        self.run_atomic(&pipe).await
    }

    #[instrument(skip(self), err)]
    async fn recent(&self, user: UserId, k: usize) -> Result<Vec<HistoryEntry>, HistoryError> {
        let k = k.min(self.capacity);
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut cmd = redis::cmd("LRANGE");
        cmd.arg(history_key(user)).arg(0).arg(k as i64 - 1);
        let raw: Vec<String> = self.run(&cmd).await?;

        raw.iter()
            .rev()
            .map(|item| {
                serde_json::from_str(item).map_err(|e| HistoryError::Serialization(e.to_string()))
            })
            .collect()
    }

    #[instrument(skip(self), err)]
    async fn flush(&self, user: UserId) -> Result<(), HistoryError> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(history_key(user));
        let _: i64 = self.run(&cmd).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), HistoryError> {
        let _: String = self.run(&redis::cmd("PING")).await?;
        Ok(())
    }
}
