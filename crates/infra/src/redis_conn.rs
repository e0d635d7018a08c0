//! Lazily opened, self-healing Redis connection shared by the cache and
//! history adapters.

use redis::RedisError;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct LazyConnection {
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl std::fmt::Debug for LazyConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyConnection")
            .field("addr", &self.client.get_connection_info().addr)
            .finish_non_exhaustive()
    }
}

impl LazyConnection {
    pub fn open(redis_url: &str) -> Result<Self, RedisError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            conn: Mutex::new(None),
        })
    }

    /// The current connection, opening one first if needed.
    pub async fn get(&self) -> Result<MultiplexedConnection, RedisError> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        debug!("opening redis connection");
        let conn = self.client.get_multiplexed_async_connection().await?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Forget the connection after a transport failure so the next call reconnects.
    pub async fn observe(&self, err: &RedisError) {
        if is_transport(err) {
            warn!(error = %err, "dropping redis connection");
            *self.conn.lock().await = None;
        }
    }
}

pub fn is_transport(err: &RedisError) -> bool {
    err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() || err.is_timeout()
}
