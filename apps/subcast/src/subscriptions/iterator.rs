//! Fan-out policies for delivering one event to many subscribers.
//!
//! Every policy isolates failures: an `Err` or a panic while handling one
//! subscriber goes to `on_error` and the remaining subscribers are still
//! handled. `process` returns only after every delivery has finished.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};

use crate::auth::{self, Guards};
use crate::config::{DeliverySettings, IteratorKind};
use crate::error::SubscriptionError;

use super::subscriber::Subscriber;

pub type DeliverFuture<'a> = BoxFuture<'a, Result<(), SubscriptionError>>;

/// Per-subscriber delivery callback.
pub type OnEach<'a> = dyn Fn(Subscriber) -> DeliverFuture<'a> + Send + Sync + 'a;

/// Receives each isolated failure together with the subscriber it hit.
pub type OnError<'a> = dyn Fn(SubscriptionError, Option<&Subscriber>) + Send + Sync + 'a;

#[async_trait]
pub trait DeliveryIterator: Send + Sync {
    async fn process(
        &self,
        subscribers: Vec<Subscriber>,
        on_each: &OnEach<'_>,
        on_error: &OnError<'_>,
    );
}

/// Default error handler: log and move on.
pub fn log_error(err: SubscriptionError, subscriber: Option<&Subscriber>) {
    match subscriber {
        Some(subscriber) => {
            tracing::error!(channel = %subscriber.channel, ?err, "subscription delivery failed")
        }
        None => tracing::error!(?err, "subscription delivery failed"),
    }
}

/// Run one delivery, turning a panic into an ordinary error.
async fn deliver(on_each: &OnEach<'_>, subscriber: &Subscriber) -> Result<(), SubscriptionError> {
    match AssertUnwindSafe(on_each(subscriber.clone()))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => Err(SubscriptionError::DeliveryPanicked {
            channel: subscriber.channel.clone(),
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// One subscriber after another, in the order given.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncIterator;

#[async_trait]
impl DeliveryIterator for SyncIterator {
    async fn process(
        &self,
        subscribers: Vec<Subscriber>,
        on_each: &OnEach<'_>,
        on_error: &OnError<'_>,
    ) {
        for subscriber in subscribers {
            if let Err(err) = deliver(on_each, &subscriber).await {
                on_error(err, Some(&subscriber));
            }
        }
    }
}

/// Up to `limit` deliveries in flight at once, all polled by the calling task.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrentIterator {
    limit: usize,
}

impl ConcurrentIterator {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }
}

#[async_trait]
impl DeliveryIterator for ConcurrentIterator {
    async fn process(
        &self,
        subscribers: Vec<Subscriber>,
        on_each: &OnEach<'_>,
        on_error: &OnError<'_>,
    ) {
        futures_util::stream::iter(subscribers)
            .for_each_concurrent(self.limit, |subscriber| async move {
                if let Err(err) = deliver(on_each, &subscriber).await {
                    on_error(err, Some(&subscriber));
                }
            })
            .await;
    }
}

/// Delivery under each subscriber's own stored identity.
///
/// Each delivery future runs with the subscriber's principal pinned on the
/// guard named in its context snapshot (nothing is pinned for anonymous
/// subscribers). The pin belongs to that future alone, so it wraps the
/// concurrent policy as safely as the sequential one and never leaks into
/// the broadcasting request.
pub struct AuthenticatingIterator<I = SyncIterator> {
    guards: Arc<Guards>,
    inner: I,
}

impl<I: DeliveryIterator> AuthenticatingIterator<I> {
    pub fn new(guards: Arc<Guards>, inner: I) -> Self {
        Self { guards, inner }
    }
}

#[async_trait]
impl<I: DeliveryIterator> DeliveryIterator for AuthenticatingIterator<I> {
    async fn process(
        &self,
        subscribers: Vec<Subscriber>,
        on_each: &OnEach<'_>,
        on_error: &OnError<'_>,
    ) {
        let guards = &self.guards;
        let authenticated = move |subscriber: Subscriber| {
            let guard = subscriber
                .context
                .guard()
                .unwrap_or(guards.default_name())
                .to_string();
            let user = subscriber.context.user().cloned();
            auth::scoped(&guard, user, move || on_each(subscriber)).boxed()
        };

        self.inner.process(subscribers, &authenticated, on_error).await;
    }
}

/// The concurrent policy always runs authenticated: its deliveries overlap,
/// and resolvers must still see their own subscriber.
pub fn build(settings: &DeliverySettings, guards: Arc<Guards>) -> Arc<dyn DeliveryIterator> {
    match settings.iterator {
        IteratorKind::Sync => Arc::new(SyncIterator),
        IteratorKind::Concurrent => Arc::new(AuthenticatingIterator::new(
            guards,
            ConcurrentIterator::new(settings.concurrency),
        )),
        IteratorKind::Authenticating => Arc::new(AuthenticatingIterator::new(guards, SyncIterator)),
    }
}
