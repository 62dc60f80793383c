//! Durable directory of subscribers and the topic -> channels index.
//!
//! Persisted layout (after prefixing):
//! - `<prefix>.subscriber.<channel>` -> serialized [`Subscriber`]
//! - `<prefix>.topic.<topic>`        -> channels listening on the topic

pub mod cache;
pub mod sets;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{StorageBackendKind, StorageDriver, StorageSettings};
use crate::db::{MemoryStore, RedisStore};
use crate::error::SubscriptionError;

use super::subscriber::Subscriber;

pub use cache::CacheStorage;
pub use sets::SetStorage;

/// Contract every subscriber storage backend implements identically.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn subscriber_by_channel(
        &self,
        channel: &str,
    ) -> Result<Option<Subscriber>, SubscriptionError>;

    /// Live subscribers of `topic`. Members whose record expired or cannot be
    /// parsed are left out.
    async fn subscribers_by_topic(&self, topic: &str) -> Result<Vec<Subscriber>, SubscriptionError>;

    /// Index `subscriber` under `topic` and persist it. Sets `subscriber.topic`.
    async fn store_subscriber(
        &self,
        subscriber: &mut Subscriber,
        topic: &str,
    ) -> Result<(), SubscriptionError>;

    /// Remove the record and its topic membership, returning what was removed.
    async fn delete_subscriber(&self, channel: &str)
        -> Result<Option<Subscriber>, SubscriptionError>;
}

/// Key naming shared by all backends.
#[derive(Debug, Clone)]
pub struct StorageKeys {
    prefix: String,
}

impl StorageKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn subscriber(&self, channel: &str) -> String {
        format!("{}.subscriber.{}", self.prefix, channel)
    }

    pub fn topic(&self, topic: &str) -> String {
        format!("{}.topic.{}", self.prefix, topic)
    }
}

/// Parse a stored record, treating anything unreadable as absent.
pub(crate) fn decode_record(channel: &str, raw: &str) -> Option<Subscriber> {
    match Subscriber::from_json(raw) {
        Ok(subscriber) => Some(subscriber),
        Err(err) => {
            tracing::warn!(%channel, ?err, "discarding unreadable subscriber record");
            None
        }
    }
}

/// Build the configured backend on top of the configured driver.
pub async fn connect(settings: &StorageSettings) -> Result<Arc<dyn StorageBackend>, SubscriptionError> {
    let keys = StorageKeys::new(settings.prefix.clone());

    let storage: Arc<dyn StorageBackend> = match (&settings.driver, settings.backend) {
        (StorageDriver::Memory, StorageBackendKind::Cache) => Arc::new(CacheStorage::new(
            Arc::new(MemoryStore::new()),
            keys,
            settings.ttl_secs,
        )),
        (StorageDriver::Memory, StorageBackendKind::Sets) => Arc::new(SetStorage::new(
            Arc::new(MemoryStore::new()),
            keys,
            settings.ttl_secs,
        )),
        (StorageDriver::Redis { url }, StorageBackendKind::Cache) => Arc::new(CacheStorage::new(
            Arc::new(RedisStore::connect(url).await?),
            keys,
            settings.ttl_secs,
        )),
        (StorageDriver::Redis { url }, StorageBackendKind::Sets) => Arc::new(SetStorage::new(
            Arc::new(RedisStore::connect(url).await?),
            keys,
            settings.ttl_secs,
        )),
    };

    tracing::info!(
        driver = settings.driver.name(),
        backend = ?settings.backend,
        ttl_secs = ?settings.ttl_secs,
        "subscription storage ready"
    );

    Ok(storage)
}
