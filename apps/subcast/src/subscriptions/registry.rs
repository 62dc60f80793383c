//! Subscription field name -> executable definition.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use dashmap::DashMap;
use serde_json::Value;
use subcast_common::topic_name;

use crate::auth::Principal;
use crate::error::SubscriptionError;

use super::subscriber::Subscriber;

/// What a definition may inspect about the request asking for access.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub headers: HeaderMap,
    /// Principal authenticated on the request, if any.
    pub user: Option<Principal>,
    /// Transport socket asking to join the channel, for auth handshakes.
    pub socket_id: Option<String>,
}

impl RequestMeta {
    pub fn for_user(user: Principal) -> Self {
        Self {
            user: Some(user),
            ..Self::default()
        }
    }
}

/// Behaviour of one subscription field.
#[async_trait]
pub trait SubscriptionDefinition: Send + Sync {
    /// May this subscriber listen at all? Checked on subscribe and on
    /// transport auth handshakes.
    async fn authorize(&self, subscriber: &Subscriber, request: &RequestMeta) -> bool;

    /// Should this event reach this subscriber?
    async fn filter(&self, subscriber: &Subscriber, root: &Value) -> bool;

    /// Value handed to the executor as the subscription field's result.
    async fn resolve(&self, root: Value, _subscriber: &Subscriber) -> Result<Value, SubscriptionError> {
        Ok(root)
    }

    /// Topic an event for `field_name` is published on.
    fn encode_topic(&self, field_name: &str, _root: &Value) -> String {
        topic_name(field_name)
    }

    /// Topic a new subscriber for `field_name` is stored under.
    fn decode_topic(&self, field_name: &str, _subscriber: &Subscriber) -> String {
        topic_name(field_name)
    }
}

/// Definitions for one application instance.
#[derive(Default)]
pub struct SubscriptionRegistry {
    definitions: DashMap<String, Arc<dyn SubscriptionDefinition>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `definition` for `field_name`. A later registration for the
    /// same field replaces the earlier one.
    pub fn register(&self, definition: Arc<dyn SubscriptionDefinition>, field_name: &str) {
        if self
            .definitions
            .insert(field_name.to_string(), definition)
            .is_some()
        {
            tracing::debug!(%field_name, "subscription definition replaced");
        }
    }

    pub fn subscription(
        &self,
        field_name: &str,
    ) -> Result<Arc<dyn SubscriptionDefinition>, SubscriptionError> {
        self.definitions
            .get(field_name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SubscriptionError::UnknownSubscription(field_name.to_string()))
    }

    pub fn fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self.definitions.iter().map(|e| e.key().clone()).collect();
        fields.sort();
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriptions::subscriber::ContextSnapshot;
    use subcast_common::ChannelKind;

    struct Fixed(bool);

    #[async_trait]
    impl SubscriptionDefinition for Fixed {
        async fn authorize(&self, _: &Subscriber, _: &RequestMeta) -> bool {
            self.0
        }

        async fn filter(&self, _: &Subscriber, _: &Value) -> bool {
            self.0
        }
    }

    struct PerAuthor;

    #[async_trait]
    impl SubscriptionDefinition for PerAuthor {
        async fn authorize(&self, _: &Subscriber, _: &RequestMeta) -> bool {
            true
        }

        async fn filter(&self, _: &Subscriber, _: &Value) -> bool {
            true
        }

        fn encode_topic(&self, field_name: &str, root: &Value) -> String {
            format!("{}:{}", topic_name(field_name), root["author"].as_str().unwrap_or("*"))
        }
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let registry = SubscriptionRegistry::new();
        registry.register(Arc::new(Fixed(false)), "onPostCreated");
        registry.register(Arc::new(Fixed(true)), "onPostCreated");

        let subscriber = Subscriber::new(
            ChannelKind::Private,
            "onPostCreated",
            "subscription { onPostCreated { id } }",
            ContextSnapshot::anonymous(),
        );
        let definition = registry.subscription("onPostCreated").unwrap();
        assert!(definition.authorize(&subscriber, &RequestMeta::default()).await);
        assert_eq!(registry.fields(), vec!["onPostCreated"]);
    }

    #[test]
    fn unknown_field_is_an_error() {
        let registry = SubscriptionRegistry::new();
        let err = registry.subscription("nope").err().unwrap();
        assert!(matches!(err, SubscriptionError::UnknownSubscription(f) if f == "nope"));
        assert!(registry.fields().is_empty());
    }

    #[test]
    fn default_topics_are_upper_snake_case() {
        let definition = Fixed(true);
        assert_eq!(
            definition.encode_topic("onPostCreated", &Value::Null),
            "ON_POST_CREATED"
        );
    }

    #[test]
    fn topic_encoding_can_be_overridden() {
        let root = serde_json::json!({ "author": "usr_1" });
        assert_eq!(PerAuthor.encode_topic("onPostCreated", &root), "ON_POST_CREATED:usr_1");
    }
}
