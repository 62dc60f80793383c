//! Storage over a plain key-value cache.
//!
//! Topic membership is a JSON list rewritten in full on every change. Two
//! writers updating the same topic concurrently can lose one update; pick
//! [`super::SetStorage`] when membership must never drop an addition.

use std::sync::Arc;

use async_trait::async_trait;

use super::{decode_record, StorageBackend, StorageKeys};
use crate::db::KeyValueStore;
use crate::error::SubscriptionError;
use crate::subscriptions::subscriber::Subscriber;

pub struct CacheStorage {
    cache: Arc<dyn KeyValueStore>,
    keys: StorageKeys,
    ttl_secs: Option<u64>,
}

impl CacheStorage {
    pub fn new(cache: Arc<dyn KeyValueStore>, keys: StorageKeys, ttl_secs: Option<u64>) -> Self {
        Self {
            cache,
            keys,
            ttl_secs,
        }
    }

    async fn topic_channels(&self, topic: &str) -> Result<Vec<String>, SubscriptionError> {
        let Some(raw) = self.cache.get(&self.keys.topic(topic)).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(channels) => Ok(channels),
            Err(err) => {
                tracing::warn!(%topic, ?err, "discarding unreadable topic list");
                Ok(Vec::new())
            }
        }
    }

    async fn write_topic(&self, topic: &str, channels: &[String]) -> Result<(), SubscriptionError> {
        let key = self.keys.topic(topic);
        if channels.is_empty() {
            return self.cache.forget(&key).await;
        }
        let raw = serde_json::to_string(channels)?;
        self.cache.put(&key, &raw, self.ttl_secs).await
    }

    /// Returns `true` when the channel was not listed before.
    async fn add_to_topic(&self, topic: &str, channel: &str) -> Result<bool, SubscriptionError> {
        let mut channels = self.topic_channels(topic).await?;
        let added = !channels.iter().any(|c| c == channel);
        if added {
            channels.push(channel.to_string());
        }
        // Rewriting also slides the topic TTL forward.
        self.write_topic(topic, &channels).await?;
        Ok(added)
    }

    async fn remove_from_topic(&self, topic: &str, gone: &[String]) -> Result<(), SubscriptionError> {
        let mut channels = self.topic_channels(topic).await?;
        let before = channels.len();
        channels.retain(|c| !gone.contains(c));
        if channels.len() == before {
            return Ok(());
        }
        self.write_topic(topic, &channels).await
    }
}

#[async_trait]
impl StorageBackend for CacheStorage {
    async fn subscriber_by_channel(
        &self,
        channel: &str,
    ) -> Result<Option<Subscriber>, SubscriptionError> {
        let raw = self.cache.get(&self.keys.subscriber(channel)).await?;
        Ok(raw.and_then(|raw| decode_record(channel, &raw)))
    }

    async fn subscribers_by_topic(&self, topic: &str) -> Result<Vec<Subscriber>, SubscriptionError> {
        let channels = self.topic_channels(topic).await?;
        let mut subscribers = Vec::with_capacity(channels.len());
        let mut stale = Vec::new();
        for channel in channels {
            match self.subscriber_by_channel(&channel).await? {
                Some(subscriber) => subscribers.push(subscriber),
                None => stale.push(channel),
            }
        }

        if !stale.is_empty() {
            tracing::debug!(%topic, stale = stale.len(), "pruning stale topic members");
            if let Err(err) = self.remove_from_topic(topic, &stale).await {
                tracing::warn!(%topic, ?err, "failed to prune stale topic members");
            }
        }

        Ok(subscribers)
    }

    async fn store_subscriber(
        &self,
        subscriber: &mut Subscriber,
        topic: &str,
    ) -> Result<(), SubscriptionError> {
        let previous = self.subscriber_by_channel(&subscriber.channel).await?;
        if let Some(old_topic) = previous.and_then(|p| p.topic).filter(|t| t != topic) {
            self.remove_from_topic(&old_topic, &[subscriber.channel.clone()])
                .await?;
        }

        let old_topic = subscriber.topic.replace(topic.to_string());
        let record = match subscriber.to_json() {
            Ok(record) => record,
            Err(err) => {
                subscriber.topic = old_topic;
                return Err(err);
            }
        };

        let added = self.add_to_topic(topic, &subscriber.channel).await?;

        let key = self.keys.subscriber(&subscriber.channel);
        if let Err(err) = self.cache.put(&key, &record, self.ttl_secs).await {
            tracing::error!(channel = %subscriber.channel, ?err, "storing subscriber failed");
            // An existing membership still belongs to the record already stored.
            if added {
                if let Err(rollback) = self
                    .remove_from_topic(topic, &[subscriber.channel.clone()])
                    .await
                {
                    tracing::warn!(channel = %subscriber.channel, ?rollback, "topic rollback failed");
                }
            }
            return Err(err);
        }

        tracing::debug!(channel = %subscriber.channel, %topic, "subscriber stored");
        Ok(())
    }

    async fn delete_subscriber(
        &self,
        channel: &str,
    ) -> Result<Option<Subscriber>, SubscriptionError> {
        let key = self.keys.subscriber(channel);
        let Some(raw) = self.cache.get(&key).await? else {
            return Ok(None);
        };
        self.cache.forget(&key).await?;

        let Some(subscriber) = decode_record(channel, &raw) else {
            return Ok(None);
        };
        if let Some(topic) = &subscriber.topic {
            self.remove_from_topic(topic, &[channel.to_string()]).await?;
        }

        tracing::debug!(%channel, "subscriber deleted");
        Ok(Some(subscriber))
    }
}
