//! The persisted record of one live subscription.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use subcast_common::ChannelKind;

use crate::auth::Principal;
use crate::error::SubscriptionError;

/// Current layout of [`ContextSnapshot`]. Records written with any other
/// version are treated as unreadable.
pub const SNAPSHOT_VERSION: u16 = 1;

/// What a subscriber's request knew about authentication at subscribe time.
///
/// Only plain scalars are kept, so a rehydrated snapshot can answer "who is the
/// current user" without any live request or connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub version: u16,
    #[serde(default)]
    pub guard: Option<String>,
    #[serde(default)]
    pub user: Option<Principal>,
}

impl ContextSnapshot {
    pub fn anonymous() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            guard: None,
            user: None,
        }
    }

    pub fn authenticated(guard: impl Into<String>, user: Principal) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            guard: Some(guard.into()),
            user: Some(user),
        }
    }

    pub fn user(&self) -> Option<&Principal> {
        self.user.as_ref()
    }

    pub fn guard(&self) -> Option<&str> {
        self.guard.as_deref()
    }
}

impl Default for ContextSnapshot {
    fn default() -> Self {
        Self::anonymous()
    }
}

/// One client's registration for one subscription field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    /// Globally unique delivery destination.
    pub channel: String,
    /// Set once, by the storage backend, when the subscriber is stored.
    #[serde(default)]
    pub topic: Option<String>,
    pub field_name: String,
    #[serde(default)]
    pub operation_name: Option<String>,
    /// Resolved arguments of the subscription field, used by filters.
    #[serde(default)]
    pub args: Map<String, Value>,
    /// The full document the client subscribed with.
    pub query: String,
    #[serde(default)]
    pub variables: Map<String, Value>,
    pub context: ContextSnapshot,
    pub created_at: DateTime<Utc>,
}

impl Subscriber {
    pub fn new(
        kind: ChannelKind,
        field_name: impl Into<String>,
        query: impl Into<String>,
        context: ContextSnapshot,
    ) -> Self {
        Self {
            channel: kind.generate(),
            topic: None,
            field_name: field_name.into(),
            operation_name: None,
            args: Map::new(),
            query: query.into(),
            variables: Map::new(),
            context,
            created_at: Utc::now(),
        }
    }

    pub fn with_args(mut self, args: Map<String, Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    pub fn to_json(&self) -> Result<String, SubscriptionError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a stored record, rejecting snapshots from an unknown layout.
    pub fn from_json(raw: &str) -> Result<Self, SubscriptionError> {
        let subscriber: Subscriber = serde_json::from_str(raw)?;
        if subscriber.context.version != SNAPSHOT_VERSION {
            return Err(SubscriptionError::Serialization(serde::de::Error::custom(
                format!(
                    "unsupported context snapshot version {}",
                    subscriber.context.version
                ),
            )));
        }
        Ok(subscriber)
    }
}
