//! Storage over a store with native atomic set commands.
//!
//! Membership changes are single `SADD`/`SREM` commands, so concurrent
//! writers never lose each other's channels. Records and memberships expire
//! independently; reads drop members whose record is gone and remove them from
//! the set while they are at it.

use std::sync::Arc;

use async_trait::async_trait;

use super::{decode_record, StorageBackend, StorageKeys};
use crate::db::SetStore;
use crate::error::SubscriptionError;
use crate::subscriptions::subscriber::Subscriber;

pub struct SetStorage {
    store: Arc<dyn SetStore>,
    keys: StorageKeys,
    ttl_secs: Option<u64>,
}

impl SetStorage {
    pub fn new(store: Arc<dyn SetStore>, keys: StorageKeys, ttl_secs: Option<u64>) -> Self {
        Self {
            store,
            keys,
            ttl_secs,
        }
    }
}

#[async_trait]
impl StorageBackend for SetStorage {
    async fn subscriber_by_channel(
        &self,
        channel: &str,
    ) -> Result<Option<Subscriber>, SubscriptionError> {
        let raw = self.store.get(&self.keys.subscriber(channel)).await?;
        Ok(raw.and_then(|raw| decode_record(channel, &raw)))
    }

    async fn subscribers_by_topic(&self, topic: &str) -> Result<Vec<Subscriber>, SubscriptionError> {
        let topic_key = self.keys.topic(topic);
        let channels = self.store.smembers(&topic_key).await?;
        if channels.is_empty() {
            return Ok(Vec::new());
        }

        let record_keys: Vec<String> = channels.iter().map(|c| self.keys.subscriber(c)).collect();
        let records = self.store.mget(&record_keys).await?;

        let mut subscribers = Vec::with_capacity(channels.len());
        let mut stale = Vec::new();
        for (channel, raw) in channels.into_iter().zip(records) {
            match raw.and_then(|raw| decode_record(&channel, &raw)) {
                Some(subscriber) => subscribers.push(subscriber),
                None => stale.push(channel),
            }
        }

        if !stale.is_empty() {
            tracing::debug!(%topic, stale = stale.len(), "pruning stale topic members");
            if let Err(err) = self.store.srem(&topic_key, &stale).await {
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
            self.store
                .srem(&self.keys.topic(&old_topic), &[subscriber.channel.clone()])
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

        let topic_key = self.keys.topic(topic);
        let added = self.store.sadd(&topic_key, &subscriber.channel).await?;
        if let Some(ttl) = self.ttl_secs {
            // Sliding expiry: the set lives as long as its newest member.
            self.store.expire(&topic_key, ttl).await?;
        }

        let key = self.keys.subscriber(&subscriber.channel);
        if let Err(err) = self.store.set(&key, &record, self.ttl_secs).await {
            tracing::error!(channel = %subscriber.channel, ?err, "storing subscriber failed");
            // An existing membership still belongs to the record already stored.
            if added {
                if let Err(rollback) = self
                    .store
                    .srem(&topic_key, &[subscriber.channel.clone()])
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
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        self.store.del(&key).await?;

        let Some(subscriber) = decode_record(channel, &raw) else {
            return Ok(None);
        };
        if let Some(topic) = &subscriber.topic {
            self.store
                .srem(&self.keys.topic(topic), &[channel.to_string()])
                .await?;
        }

        tracing::debug!(%channel, "subscriber deleted");
        Ok(Some(subscriber))
    }
}
