use std::time::Duration;

use redis::aio::MultiplexedConnection;

use crate::StoreError;

#[derive(Clone)]
pub struct RedisBackend {
    conn: MultiplexedConnection,
}

impl RedisBackend {
    /// Opens a multiplexed connection and requires a `PING` reply within
    /// `probe_timeout`.
    pub async fn connect(url: &str, probe_timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|err| StoreError::Connection(format!("parse redis url: {}", err)))?;

        let probe = async {
            let mut conn = client.get_multiplexed_async_connection().await?;
            let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<_, redis::RedisError>((conn, pong))
        };

        let (conn, pong) = tokio::time::timeout(probe_timeout, probe)
            .await
            .map_err(|_| StoreError::Connection("redis ping timed out".to_string()))?
            .map_err(|err| StoreError::Connection(format!("redis ping: {}", err)))?;

        tracing::debug!(reply = %pong, "store.redis_connected");
        Ok(Self { conn })
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(backend_error)?;
        value.ok_or(StoreError::NotFound)
    }

    pub async fn set(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            cmd.arg("PX").arg(millis);
        }
        let _: () = cmd.query_async(&mut conn).await.map_err(backend_error)?;
        Ok(())
    }
}

fn backend_error(err: redis::RedisError) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout
    } else {
        StoreError::Backend(err.to_string())
    }
}
