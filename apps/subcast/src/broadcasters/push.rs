//! Driver for an HTTP push-messaging service.
//!
//! Deliveries are JSON POSTs signed with HMAC-SHA256 over the raw body. The
//! same shared secret signs channel auth handshakes and authenticates the
//! service's webhooks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;

use super::{Broadcaster, ChannelAuthRequest, HookRequest};
use crate::error::{ApiError, SubscriptionError};
use crate::subscriptions::storage::StorageBackend;
use crate::subscriptions::subscriber::Subscriber;

type HmacSha256 = Hmac<Sha256>;

pub const KEY_HEADER: &str = "x-subcast-key";
pub const SIGNATURE_HEADER: &str = "x-subcast-signature";

/// Event name the service receives for every delivery.
pub const UPDATE_EVENT: &str = "subscription.update";

#[derive(Debug, Serialize)]
struct PushMessage<'a> {
    channel: &'a str,
    event: &'static str,
    data: &'a Value,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    events: Vec<WebhookEvent>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    name: String,
    #[serde(default)]
    channel: Option<String>,
}

pub struct PushBroadcaster {
    http: reqwest::Client,
    url: String,
    key: String,
    secret: String,
    storage: Arc<dyn StorageBackend>,
}

impl PushBroadcaster {
    /// Build from the driver's nested config: `url`, `key`, `secret` and an
    /// optional `timeout_ms`.
    pub fn from_config(config: &Value, storage: Arc<dyn StorageBackend>) -> Result<Self, SubscriptionError> {
        let url = required(config, "url")?;
        let key = required(config, "key")?;
        let secret = required(config, "secret")?;

        let mut builder = reqwest::Client::builder();
        if let Some(ms) = config.get("timeout_ms").and_then(Value::as_u64) {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        let http = builder
            .build()
            .map_err(|e| SubscriptionError::InvalidConfig(format!("push client: {e}")))?;

        Ok(Self {
            http,
            url,
            key,
            secret,
            storage,
        })
    }

    /// Base64 HMAC-SHA256 of `message` under the shared secret.
    pub fn sign(&self, message: &[u8]) -> String {
        let mut mac = mac(&self.secret);
        mac.update(message);
        STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Auth token a socket presents to join `channel`: `key:signature`.
    pub fn channel_token(&self, socket_id: &str, channel: &str) -> String {
        let signature = self.sign(format!("{socket_id}:{channel}").as_bytes());
        format!("{}:{}", self.key, signature)
    }

    fn verify(&self, body: &[u8], signature: &str) -> bool {
        let Ok(expected) = STANDARD.decode(signature) else {
            return false;
        };
        let mut mac = mac(&self.secret);
        mac.update(body);
        mac.verify_slice(&expected).is_ok()
    }
}

fn mac(secret: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length")
}

fn required(config: &Value, name: &str) -> Result<String, SubscriptionError> {
    config
        .get(name)
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| SubscriptionError::InvalidDriver(format!("push driver requires `{name}`")))
}

#[async_trait]
impl Broadcaster for PushBroadcaster {
    fn name(&self) -> &str {
        "push"
    }

    fn authorized(&self, request: &ChannelAuthRequest) -> Response {
        match request.meta.socket_id.as_deref() {
            Some(socket_id) => Json(json!({
                "auth": self.channel_token(socket_id, &request.channel),
            }))
            .into_response(),
            None => ApiError::bad_request("socket_id is required").into_response(),
        }
    }

    fn unauthorized(&self, _request: &ChannelAuthRequest) -> Response {
        ApiError::forbidden("Subscription not authorized").into_response()
    }

    async fn hook(&self, request: HookRequest) -> Result<Response, SubscriptionError> {
        let key = request.headers.get(KEY_HEADER).and_then(|v| v.to_str().ok());
        let signature = request
            .headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());

        let authentic = match (key, signature) {
            (Some(key), Some(signature)) => key == self.key && self.verify(&request.body, signature),
            _ => false,
        };
        if !authentic {
            tracing::warn!("rejected push webhook with bad signature");
            return Ok(ApiError::unauthorized("Invalid webhook signature").into_response());
        }

        let payload: WebhookPayload = serde_json::from_slice(&request.body)?;
        let mut vacated = 0usize;
        for event in payload.events {
            match (event.name.as_str(), event.channel) {
                ("channel_vacated", Some(channel)) => {
                    if self.storage.delete_subscriber(&channel).await?.is_some() {
                        vacated += 1;
                    }
                    tracing::debug!(%channel, "channel vacated");
                }
                (name, _) => tracing::debug!(event = %name, "ignoring webhook event"),
            }
        }

        Ok(Json(json!({ "vacated": vacated })).into_response())
    }

    async fn broadcast(&self, subscriber: &Subscriber, data: &Value) -> Result<(), SubscriptionError> {
        let body = serde_json::to_vec(&PushMessage {
            channel: &subscriber.channel,
            event: UPDATE_EVENT,
            data,
        })?;
        let signature = self.sign(&body);

        self.http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(KEY_HEADER, &self.key)
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(?e, channel = %subscriber.channel, "push delivery failed");
                SubscriptionError::from(e)
            })?
            .error_for_status()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::subscriptions::registry::RequestMeta;
    use crate::subscriptions::storage::{SetStorage, StorageKeys};
    use crate::subscriptions::subscriber::ContextSnapshot;
    use axum::body::{to_bytes, Bytes};
    use axum::http::{HeaderMap, HeaderValue, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use parking_lot::Mutex;
    use subcast_common::ChannelKind;

    fn storage() -> Arc<dyn StorageBackend> {
        Arc::new(SetStorage::new(
            Arc::new(MemoryStore::new()),
            StorageKeys::new("graphql"),
            None,
        ))
    }

    fn driver(url: &str, storage: Arc<dyn StorageBackend>) -> PushBroadcaster {
        PushBroadcaster::from_config(
            &json!({ "url": url, "key": "app-key", "secret": "s3cret" }),
            storage,
        )
        .unwrap()
    }

    fn signed(driver: &PushBroadcaster, body: &str) -> HookRequest {
        let mut headers = HeaderMap::new();
        headers.insert(KEY_HEADER, HeaderValue::from_static("app-key"));
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&driver.sign(body.as_bytes())).unwrap(),
        );
        HookRequest {
            headers,
            body: Bytes::from(body.to_string()),
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn missing_settings_are_driver_errors() {
        let err = PushBroadcaster::from_config(&json!({ "url": "http://x" }), storage())
            .err()
            .unwrap();
        assert!(matches!(err, SubscriptionError::InvalidDriver(m) if m.contains("`key`")));
    }

    #[tokio::test]
    async fn authorized_signs_socket_and_channel() {
        let driver = driver("http://localhost", storage());
        let request = ChannelAuthRequest {
            channel: "private-subcast-abc".into(),
            meta: RequestMeta {
                socket_id: Some("123.456".into()),
                ..RequestMeta::default()
            },
        };

        let response = driver.authorized(&request);
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let expected = format!("app-key:{}", driver.sign(b"123.456:private-subcast-abc"));
        assert_eq!(body["auth"], expected.as_str());
    }

    #[tokio::test]
    async fn authorized_without_socket_is_bad_request() {
        let driver = driver("http://localhost", storage());
        let request = ChannelAuthRequest {
            channel: "private-subcast-abc".into(),
            meta: RequestMeta::default(),
        };
        assert_eq!(driver.authorized(&request).status(), StatusCode::BAD_REQUEST);
        assert_eq!(driver.unauthorized(&request).status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn hook_rejects_bad_signatures() {
        let driver = driver("http://localhost", storage());
        let mut request = signed(&driver, r#"{"events":[]}"#);
        request
            .headers
            .insert(SIGNATURE_HEADER, HeaderValue::from_static("bm9wZQ=="));

        let response = driver.hook(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn channel_vacated_deletes_subscriber() {
        let storage = storage();
        let driver = driver("http://localhost", storage.clone());

        let mut subscriber = Subscriber::new(
            ChannelKind::Private,
            "onPostCreated",
            "subscription { onPostCreated { id } }",
            ContextSnapshot::anonymous(),
        );
        storage
            .store_subscriber(&mut subscriber, "ON_POST_CREATED")
            .await
            .unwrap();

        let body = json!({
            "events": [
                { "name": "channel_vacated", "channel": subscriber.channel },
                { "name": "member_added", "channel": subscriber.channel },
            ]
        })
        .to_string();
        let response = driver.hook(signed(&driver, &body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["vacated"], 1);
        assert!(storage
            .subscriber_by_channel(&subscriber.channel)
            .await
            .unwrap()
            .is_none());
        assert!(storage
            .subscribers_by_topic("ON_POST_CREATED")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn broadcast_posts_signed_message() {
        let received: Arc<Mutex<Vec<(HeaderMap, Bytes)>>> = Arc::default();
        let sink = received.clone();
        let app = Router::new().route(
            "/events",
            post(move |headers: HeaderMap, body: Bytes| {
                let sink = sink.clone();
                async move {
                    sink.lock().push((headers, body));
                    StatusCode::OK
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let driver = driver(&format!("http://{addr}/events"), storage());
        let subscriber = Subscriber::new(
            ChannelKind::Private,
            "onPostCreated",
            "subscription { onPostCreated { id } }",
            ContextSnapshot::anonymous(),
        );
        driver
            .broadcast(&subscriber, &json!({ "data": { "onPostCreated": { "id": 9 } } }))
            .await
            .unwrap();

        let received = received.lock();
        assert_eq!(received.len(), 1);
        let (headers, body) = &received[0];
        assert_eq!(headers[KEY_HEADER], "app-key");
        assert_eq!(
            headers[SIGNATURE_HEADER].to_str().unwrap(),
            driver.sign(body)
        );
        let message: Value = serde_json::from_slice(body).unwrap();
        assert_eq!(message["channel"], subscriber.channel.as_str());
        assert_eq!(message["event"], UPDATE_EVENT);
        assert_eq!(message["data"]["data"]["onPostCreated"]["id"], 9);
    }

    #[tokio::test]
    async fn non_success_status_is_a_broadcast_error() {
        let app = Router::new().route("/events", post(|| async { StatusCode::BAD_GATEWAY }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let driver = driver(&format!("http://{addr}/events"), storage());
        let subscriber = Subscriber::new(
            ChannelKind::Private,
            "onPostCreated",
            "subscription { onPostCreated { id } }",
            ContextSnapshot::anonymous(),
        );
        let err = driver.broadcast(&subscriber, &Value::Null).await.err().unwrap();
        assert!(matches!(err, SubscriptionError::Broadcast(_)));
    }
}
