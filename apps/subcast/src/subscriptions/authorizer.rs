//! Transport auth handshakes for subscriber channels.
//!
//! A real-time transport asks before letting a socket join a channel. The
//! stored subscriber's definition decides; refused subscribers are deleted so
//! they stop receiving broadcasts.

use std::sync::Arc;

use axum::response::Response;

use super::registry::{RequestMeta, SubscriptionRegistry};
use super::storage::StorageBackend;
use crate::broadcasters::{BroadcastManager, ChannelAuthRequest};
use crate::error::SubscriptionError;

pub struct SubscriptionAuthorizer {
    registry: Arc<SubscriptionRegistry>,
    storage: Arc<dyn StorageBackend>,
    manager: Arc<BroadcastManager>,
}

impl SubscriptionAuthorizer {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        storage: Arc<dyn StorageBackend>,
        manager: Arc<BroadcastManager>,
    ) -> Self {
        Self {
            registry,
            storage,
            manager,
        }
    }

    /// May the requester join `channel`?
    ///
    /// Unknown channels are refused. A stored subscriber whose field is no
    /// longer registered is refused and deleted like any other refusal.
    pub async fn check(&self, channel: &str, meta: &RequestMeta) -> Result<bool, SubscriptionError> {
        let Some(subscriber) = self.storage.subscriber_by_channel(channel).await? else {
            tracing::debug!(%channel, "auth requested for unknown channel");
            return Ok(false);
        };

        let allowed = match self.registry.subscription(&subscriber.field_name) {
            Ok(definition) => definition.authorize(&subscriber, meta).await,
            Err(SubscriptionError::UnknownSubscription(field)) => {
                tracing::warn!(%channel, %field, "stored subscriber for unregistered field");
                false
            }
            Err(err) => return Err(err),
        };

        if !allowed {
            self.storage.delete_subscriber(channel).await?;
            tracing::info!(%channel, "channel authorization refused, subscriber removed");
        }
        Ok(allowed)
    }

    /// Run [`check`](Self::check) and let the active driver shape the answer.
    pub async fn authorize(&self, request: ChannelAuthRequest) -> Result<Response, SubscriptionError> {
        let driver = self.manager.default_driver()?;
        if self.check(&request.channel, &request.meta).await? {
            Ok(driver.authorized(&request))
        } else {
            Ok(driver.unauthorized(&request))
        }
    }
}
