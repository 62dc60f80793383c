//! Event fan-out: topic lookup, per-subscriber re-execution and dispatch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::task::{JoinError, JoinSet};
use utoipa::ToSchema;

use super::executor::{ExecutionRequest, QueryExecutor};
use super::iterator::{log_error, DeliveryIterator};
use super::registry::{RequestMeta, SubscriptionDefinition, SubscriptionRegistry};
use super::storage::StorageBackend;
use super::subscriber::Subscriber;
use crate::broadcasters::BroadcastDispatcher;
use crate::config::DeliverySettings;
use crate::error::SubscriptionError;

/// What happened to one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct BroadcastReport {
    pub topic: String,
    /// Subscribers loaded for the topic.
    pub matched: usize,
    pub delivered: usize,
    /// Skipped because the definition's filter said no.
    pub filtered: usize,
    /// Skipped because the subscriber is no longer authorized.
    pub refused: usize,
    /// Errors, panics and timeouts.
    pub failed: usize,
}

enum Outcome {
    Delivered,
    Filtered,
    Refused,
}

#[derive(Default)]
struct Tally {
    delivered: AtomicUsize,
    filtered: AtomicUsize,
    refused: AtomicUsize,
    failed: AtomicUsize,
}

/// Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct SubscriptionBroadcaster {
    registry: Arc<SubscriptionRegistry>,
    storage: Arc<dyn StorageBackend>,
    executor: Arc<dyn QueryExecutor>,
    dispatcher: Arc<BroadcastDispatcher>,
    iterator: Arc<dyn DeliveryIterator>,
    settings: DeliverySettings,
    /// Broadcasts queued but not yet awaited by [`Self::drain_queued`].
    queued: Arc<Mutex<JoinSet<()>>>,
}

fn log_queued_exit(result: Result<(), JoinError>) {
    if let Err(err) = result {
        tracing::error!(?err, "queued broadcast task aborted");
    }
}

impl SubscriptionBroadcaster {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        storage: Arc<dyn StorageBackend>,
        executor: Arc<dyn QueryExecutor>,
        dispatcher: Arc<BroadcastDispatcher>,
        iterator: Arc<dyn DeliveryIterator>,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            registry,
            storage,
            executor,
            dispatcher,
            iterator,
            settings,
            queued: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    /// Register a new subscriber if its definition authorizes it.
    ///
    /// Returns `false` when authorization is refused; nothing is stored then.
    pub async fn subscribe(
        &self,
        subscriber: &mut Subscriber,
        request: &RequestMeta,
    ) -> Result<bool, SubscriptionError> {
        let definition = self.registry.subscription(&subscriber.field_name)?;
        if !definition.authorize(subscriber, request).await {
            tracing::debug!(channel = %subscriber.channel, field = %subscriber.field_name, "subscription refused");
            return Ok(false);
        }

        let topic = definition.decode_topic(&subscriber.field_name, subscriber);
        self.storage.store_subscriber(subscriber, &topic).await?;
        tracing::info!(channel = %subscriber.channel, %topic, "subscribed");
        Ok(true)
    }

    pub async fn unsubscribe(&self, channel: &str) -> Result<Option<Subscriber>, SubscriptionError> {
        let removed = self.storage.delete_subscriber(channel).await?;
        if removed.is_some() {
            tracing::info!(%channel, "unsubscribed");
        }
        Ok(removed)
    }

    /// Deliver `root` to every subscriber of `field_name`'s topic.
    ///
    /// Fails only when the field is unknown or the subscriber list cannot be
    /// loaded. Per-subscriber failures are counted in the report and logged.
    pub async fn broadcast(
        &self,
        field_name: &str,
        root: Value,
    ) -> Result<BroadcastReport, SubscriptionError> {
        let definition = self.registry.subscription(field_name)?;
        let topic = definition.encode_topic(field_name, &root);
        let subscribers = self.storage.subscribers_by_topic(&topic).await?;

        let mut report = BroadcastReport {
            topic,
            matched: subscribers.len(),
            ..BroadcastReport::default()
        };
        if subscribers.is_empty() {
            tracing::debug!(topic = %report.topic, "no subscribers");
            return Ok(report);
        }

        let tally = Tally::default();
        let timeout = self.settings.timeout;
        let (definition, root, tally_ref) = (&definition, &root, &tally);

        let on_each = |subscriber: Subscriber| {
            async move {
                let channel = subscriber.channel.clone();
                let delivery = self.deliver(definition.as_ref(), subscriber, root);
                let counter = match tokio::time::timeout(timeout, delivery).await {
                    Ok(Ok(Outcome::Delivered)) => &tally_ref.delivered,
                    Ok(Ok(Outcome::Filtered)) => &tally_ref.filtered,
                    Ok(Ok(Outcome::Refused)) => &tally_ref.refused,
                    Ok(Err(err)) => return Err(err),
                    Err(_) => return Err(timed_out(channel, timeout)),
                };
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            .boxed()
        };
        let on_error = |err: SubscriptionError, subscriber: Option<&Subscriber>| {
            tally_ref.failed.fetch_add(1, Ordering::Relaxed);
            log_error(err, subscriber);
        };

        self.iterator.process(subscribers, &on_each, &on_error).await;

        report.delivered = tally.delivered.load(Ordering::Relaxed);
        report.filtered = tally.filtered.load(Ordering::Relaxed);
        report.refused = tally.refused.load(Ordering::Relaxed);
        report.failed = tally.failed.load(Ordering::Relaxed);

        tracing::info!(
            topic = %report.topic,
            matched = report.matched,
            delivered = report.delivered,
            failed = report.failed,
            "broadcast finished"
        );
        Ok(report)
    }

    /// Run the broadcast on a background task, tracked until drained.
    ///
    /// The field is checked before spawning so an unknown field still fails
    /// at the call site.
    pub fn queue_broadcast(&self, field_name: &str, root: Value) -> Result<(), SubscriptionError> {
        self.registry.subscription(field_name)?;

        let this = self.clone();
        let field_name = field_name.to_string();
        let mut queued = self.queued.lock();
        while let Some(finished) = queued.try_join_next() {
            log_queued_exit(finished);
        }
        queued.spawn(async move {
            match this.broadcast(&field_name, root).await {
                Ok(report) => tracing::debug!(field = %field_name, ?report, "queued broadcast finished"),
                Err(err) => tracing::error!(field = %field_name, ?err, "queued broadcast failed"),
            }
        });
        Ok(())
    }

    /// Wait for every queued broadcast to finish. Returns how many were
    /// still outstanding.
    pub async fn drain_queued(&self) -> usize {
        let mut pending = std::mem::take(&mut *self.queued.lock());
        let outstanding = pending.len();
        while let Some(finished) = pending.join_next().await {
            log_queued_exit(finished);
        }
        outstanding
    }

    /// Broadcast inline, or queue it when broadcasts are configured to queue.
    /// Queued broadcasts return `None`.
    pub async fn dispatch(
        &self,
        field_name: &str,
        root: Value,
    ) -> Result<Option<BroadcastReport>, SubscriptionError> {
        if self.settings.queue_broadcasts {
            self.queue_broadcast(field_name, root)?;
            Ok(None)
        } else {
            self.broadcast(field_name, root).await.map(Some)
        }
    }

    async fn deliver(
        &self,
        definition: &dyn SubscriptionDefinition,
        subscriber: Subscriber,
        root: &Value,
    ) -> Result<Outcome, SubscriptionError> {
        // Re-check access under the identity stored at subscribe time.
        let meta = RequestMeta {
            user: subscriber.context.user().cloned(),
            ..RequestMeta::default()
        };
        if !definition.authorize(&subscriber, &meta).await {
            tracing::debug!(channel = %subscriber.channel, "subscriber no longer authorized");
            return Ok(Outcome::Refused);
        }
        if !definition.filter(&subscriber, root).await {
            return Ok(Outcome::Filtered);
        }

        let value = definition.resolve(root.clone(), &subscriber).await?;
        let result = self
            .executor
            .execute(ExecutionRequest::for_subscriber(&subscriber, value))
            .await?;
        self.dispatcher.broadcast(&subscriber, &result).await?;

        tracing::debug!(channel = %subscriber.channel, "delivered");
        Ok(Outcome::Delivered)
    }
}

fn timed_out(channel: String, timeout: Duration) -> SubscriptionError {
    SubscriptionError::DeliveryTimeout { channel, timeout }
}
