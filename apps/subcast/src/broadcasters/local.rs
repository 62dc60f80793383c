//! In-process fan-out hub for websocket sessions served by this process.
//!
//! Uses a single `tokio::sync::broadcast` channel. Each connected session
//! subscribes and keeps only the deliveries addressed to its own channels.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::Broadcaster;
use crate::error::SubscriptionError;
use crate::subscriptions::subscriber::Subscriber;

/// Capacity of the broadcast channel. Slow receivers that fall behind will
/// skip messages (RecvError::Lagged).
pub const DEFAULT_CAPACITY: usize = 4096;

/// One payload addressed to one subscriber channel.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalDelivery {
    pub channel: String,
    pub topic: Option<String>,
    pub payload: Value,
}

/// Cloneable handle; every clone feeds the same receivers.
#[derive(Clone)]
pub struct LocalBroadcaster {
    sender: broadcast::Sender<Arc<LocalDelivery>>,
}

impl LocalBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Each session calls this once to get its own receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<LocalDelivery>> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LocalBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl Broadcaster for LocalBroadcaster {
    fn name(&self) -> &str {
        "local"
    }

    async fn broadcast(&self, subscriber: &Subscriber, data: &Value) -> Result<(), SubscriptionError> {
        let delivery = LocalDelivery {
            channel: subscriber.channel.clone(),
            topic: subscriber.topic.clone(),
            payload: data.clone(),
        };
        // No receivers just means no session on this process holds the channel.
        if self.sender.send(Arc::new(delivery)).is_err() {
            tracing::debug!(channel = %subscriber.channel, "no local sessions listening");
        }
        Ok(())
    }
}
