use async_trait::async_trait;
use serde_json::Value;

use super::Broadcaster;
use crate::error::SubscriptionError;
use crate::subscriptions::subscriber::Subscriber;

/// Writes every delivery to the log. Useful in development and as a safe
/// default when no transport is configured.
#[derive(Debug, Default)]
pub struct LogBroadcaster;

#[async_trait]
impl Broadcaster for LogBroadcaster {
    fn name(&self) -> &str {
        "log"
    }

    async fn broadcast(&self, subscriber: &Subscriber, data: &Value) -> Result<(), SubscriptionError> {
        tracing::info!(
            channel = %subscriber.channel,
            topic = subscriber.topic.as_deref().unwrap_or_default(),
            payload = %data,
            "subscription broadcast"
        );
        Ok(())
    }
}
