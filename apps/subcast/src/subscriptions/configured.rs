//! Definitions for fields named in configuration.
//!
//! The standalone server has no schema of its own. Fields listed in
//! `SUBSCRIPTIONS_FIELDS` get this generic definition; an embedding
//! application registering its own definition for the same field replaces it.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::FieldAccess;

use super::registry::{RequestMeta, SubscriptionDefinition};
use super::subscriber::Subscriber;

/// Access follows [`FieldAccess`]. An event reaches a subscriber unless it
/// carries a top-level key equal to one of the subscriber's arguments but
/// with a different value.
#[derive(Debug, Clone, Copy)]
pub struct ConfiguredDefinition {
    access: FieldAccess,
}

impl ConfiguredDefinition {
    pub fn new(access: FieldAccess) -> Self {
        Self { access }
    }
}

#[async_trait]
impl SubscriptionDefinition for ConfiguredDefinition {
    async fn authorize(&self, _subscriber: &Subscriber, request: &RequestMeta) -> bool {
        match self.access {
            FieldAccess::Public => true,
            FieldAccess::Authenticated => request.user.is_some(),
        }
    }

    async fn filter(&self, subscriber: &Subscriber, root: &Value) -> bool {
        subscriber
            .args
            .iter()
            .all(|(name, wanted)| root.get(name).map_or(true, |actual| actual == wanted))
    }
}
