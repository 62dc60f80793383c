//! Redis implementation of both storage driver boundaries.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::kv::{KeyValueStore, SetStore};
use crate::error::SubscriptionError;

/// Redis-backed store. Cloning is cheap; every command runs on a clone of the
/// multiplexed connection manager.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, SubscriptionError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("redis connection manager created");
        Ok(Self { conn })
    }

    async fn write(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<(), SubscriptionError> {
        let mut conn = self.conn.clone();
        match ttl_secs {
            Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl).await,
            None => conn.set::<_, _, ()>(key, value).await,
        }
        .map_err(|e| {
            tracing::error!(?e, %key, "redis set failed");
            e.into()
        })
    }

    async fn read(&self, key: &str) -> Result<Option<String>, SubscriptionError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(|e| {
            tracing::error!(?e, %key, "redis get failed");
            e.into()
        })
    }

    async fn remove(&self, key: &str) -> Result<(), SubscriptionError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(|e| {
            tracing::error!(?e, %key, "redis del failed");
            e.into()
        })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SubscriptionError> {
        self.read(key).await
    }

    async fn put(
        &self,
        key: &str,
        value: &str,
        ttl_secs: Option<u64>,
    ) -> Result<(), SubscriptionError> {
        self.write(key, value, ttl_secs).await
    }

    async fn forget(&self, key: &str) -> Result<(), SubscriptionError> {
        self.remove(key).await
    }
}

#[async_trait]
impl SetStore for RedisStore {
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, SubscriptionError> {
        let mut conn = self.conn.clone();
        let added: i64 = conn.sadd(key, member).await.map_err(|e| {
            tracing::error!(?e, %key, "redis sadd failed");
            SubscriptionError::from(e)
        })?;
        Ok(added > 0)
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<(), SubscriptionError> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(key, members).await.map_err(|e| {
            tracing::error!(?e, %key, "redis srem failed");
            e.into()
        })
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, SubscriptionError> {
        let mut conn = self.conn.clone();
        conn.smembers(key).await.map_err(|e| {
            tracing::error!(?e, %key, "redis smembers failed");
            e.into()
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, SubscriptionError> {
        self.read(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl_secs: Option<u64>,
    ) -> Result<(), SubscriptionError> {
        self.write(key, value, ttl_secs).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, SubscriptionError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        // Always MGET so a single key still comes back as a one-element array.
        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                tracing::error!(?e, "redis mget failed");
                SubscriptionError::from(e)
            })?;
        Ok(values)
    }

    async fn del(&self, key: &str) -> Result<(), SubscriptionError> {
        self.remove(key).await
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), SubscriptionError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                tracing::error!(?e, %key, "redis expire failed");
                SubscriptionError::from(e)
            })?;
        Ok(())
    }
}
