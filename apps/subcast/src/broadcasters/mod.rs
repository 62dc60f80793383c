//! Broadcaster drivers: the last hop from a resolved payload to a client.

pub mod local;
pub mod log;
pub mod manager;
pub mod push;

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::error::SubscriptionError;
use crate::subscriptions::executor::ExecutionResult;
use crate::subscriptions::registry::RequestMeta;
use crate::subscriptions::subscriber::Subscriber;

pub use local::{LocalBroadcaster, LocalDelivery};
pub use manager::{BroadcastManager, DriverContext, DriverFactory};

/// A transport asking whether a socket may join a subscriber's channel.
#[derive(Debug, Clone)]
pub struct ChannelAuthRequest {
    pub channel: String,
    pub meta: RequestMeta,
}

/// Raw webhook call from a real-time transport.
#[derive(Debug, Clone)]
pub struct HookRequest {
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[async_trait]
pub trait Broadcaster: Send + Sync {
    fn name(&self) -> &str;

    /// Answer a transport's auth handshake for a permitted channel.
    fn authorized(&self, request: &ChannelAuthRequest) -> Response {
        Json(json!({ "channel": request.channel })).into_response()
    }

    /// Answer a transport's auth handshake for a refused channel.
    fn unauthorized(&self, _request: &ChannelAuthRequest) -> Response {
        StatusCode::FORBIDDEN.into_response()
    }

    /// Presence and lifecycle callbacks from the transport.
    async fn hook(&self, _request: HookRequest) -> Result<Response, SubscriptionError> {
        Ok(StatusCode::OK.into_response())
    }

    async fn broadcast(&self, subscriber: &Subscriber, data: &Value) -> Result<(), SubscriptionError>;
}

/// Serializes execution results and hands them to the active driver.
pub struct BroadcastDispatcher {
    manager: Arc<BroadcastManager>,
}

impl BroadcastDispatcher {
    pub fn new(manager: Arc<BroadcastManager>) -> Self {
        Self { manager }
    }

    pub async fn broadcast(
        &self,
        subscriber: &Subscriber,
        result: &ExecutionResult,
    ) -> Result<(), SubscriptionError> {
        let payload = serde_json::to_value(result)?;
        self.manager
            .default_driver()?
            .broadcast(subscriber, &payload)
            .await
    }
}
