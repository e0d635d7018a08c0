use std::time::Duration;

use async_trait::async_trait;
use redis::FromRedisValue;
use tracing::instrument;

use crate::redis_conn::{LazyConnection, is_transport};

use super::{CacheError, ResultCache};

/// `SET key value EX ttl NX` / `GET key` against one Redis database.
#[derive(Debug)]
pub struct RedisResultCache {
    conn: LazyConnection,
}

impl RedisResultCache {
    /// Does not connect; the first call does.
    pub fn new(redis_url: &str) -> Result<Self, CacheError> {
        let conn =
            LazyConnection::open(redis_url).map_err(|e| CacheError::Connection(e.to_string()))?;
        Ok(Self { conn })
    }

    async fn run<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T, CacheError> {
        let result = match self.conn.get().await {
            Ok(mut conn) => cmd.query_async(&mut conn).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                self.conn.observe(&err).await;
                Err(if is_transport(&err) {
                    CacheError::Connection(err.to_string())
                } else {
                    CacheError::Command(err.to_string())
                })
            }
        }
    }
}

#[async_trait]
impl ResultCache for RedisResultCache {
    #[instrument(skip(self, value), err)]
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("EX").arg(ttl.as_secs().max(1)).arg("NX");
        let stored: Option<String> = self.run(&cmd).await?;
        Ok(stored.is_some())
    }

    #[instrument(skip(self), err)]
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.run(&cmd).await
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let _: String = self.run(&redis::cmd("PING")).await?;
        Ok(())
    }
}
