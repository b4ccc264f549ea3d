use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::info;

/// Key-value store whose entries expire on their own.
#[async_trait]
pub trait TtlStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, Error>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Error>;

    /// Writes `value` only if `key` is absent. Returns `true` when the write happened.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, Error>;

    async fn exists(&self, key: &str) -> Result<bool, Error>;

    async fn delete(&self, key: &str) -> Result<(), Error>;

    async fn ping(&self) -> Result<(), Error>;
}

#[derive(Clone)]
pub struct RedisClient {
    connection: MultiplexedConnection,
}

impl RedisClient {
    pub async fn connect(redis_url: &str) -> Result<Self, Error> {
        info!("Connecting to Redis");

        let client =
            Client::open(redis_url).map_err(|e| anyhow!("Failed to create redis client: {}", e))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| anyhow!("Failed to connect to redis: {}", e))?;

        info!("Redis connection established");

        Ok(Self { connection })
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl TtlStore for RedisClient {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let mut conn = self.connection.clone();
        conn.get(key)
            .await
            .map_err(|e| anyhow!("Failed to read key '{}': {}", key, e))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        conn.pset_ex::<_, _, ()>(key, value, ttl_millis(ttl))
            .await
            .map_err(|e| anyhow!("Failed to write key '{}': {}", key, e))
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, Error> {
        let mut conn = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow!("Failed to reserve key '{}': {}", key, e))?;

        Ok(reply.is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, Error> {
        let mut conn = self.connection.clone();
        conn.exists(key)
            .await
            .map_err(|e| anyhow!("Failed to check key '{}': {}", key, e))
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| anyhow!("Failed to delete key '{}': {}", key, e))
    }

    async fn ping(&self) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| anyhow!("Redis ping failed: {}", e))
    }
}
