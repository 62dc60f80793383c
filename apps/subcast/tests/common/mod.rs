#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use serde_json::{json, Map, Value};
use tokio::sync::broadcast::Receiver;

use subcast::auth::{tokens, Guards, Principal, DEFAULT_GUARD};
use subcast::broadcasters::push::PushBroadcaster;
use subcast::broadcasters::LocalDelivery;
use subcast::config::Config;
use subcast::db::MemoryStore;
use subcast::error::SubscriptionError;
use subcast::subscriptions::{
    ContextSnapshot, PassthroughExecutor, RequestMeta, Subscriber, SubscriptionDefinition,
};
use subcast::AppState;
use subcast_common::ChannelKind;

pub const FIELD: &str = "onPostCreated";
pub const TOPIC: &str = "ON_POST_CREATED";

/// Config from defaults plus `vars`. Deliveries go to the in-process hub.
pub fn test_config(vars: &[(&str, &str)]) -> Config {
    let mut env: HashMap<String, String> = HashMap::new();
    env.insert("SUBSCRIPTIONS_BROADCASTER".into(), "local".into());
    for (k, v) in vars {
        env.insert(k.to_string(), v.to_string());
    }
    Config::from_lookup(|name| env.get(name).cloned()).expect("test config")
}

/// In-memory AppState with [`PostsByAuthor`] registered for [`FIELD`].
pub async fn test_state_with(vars: &[(&str, &str)]) -> AppState {
    let config = test_config(vars);
    let storage = subcast::subscriptions::storage::connect(&config.storage)
        .await
        .expect("memory storage");
    let state = AppState::assemble(
        config,
        storage,
        Arc::new(MemoryStore::new()),
        Arc::new(PassthroughExecutor),
    )
    .expect("assemble state");

    state.registry.register(
        Arc::new(PostsByAuthor {
            guards: state.guards.clone(),
        }),
        FIELD,
    );
    state
}

pub async fn test_state() -> AppState {
    test_state_with(&[]).await
}

/// Build the full application router wired to the test state.
pub async fn test_app() -> (Router, AppState) {
    let state = test_state().await;
    let app = subcast::routes::router().with_state(state.clone());
    (app, state)
}

pub async fn issue_token(state: &AppState, user_id: &str) -> String {
    tokens::issue(state.tokens.as_ref(), &Principal::new(user_id), 60)
        .await
        .expect("issue token")
}

/// Subscriber for [`FIELD`] filtered on `author`, owned by `user_id`.
pub fn post_subscriber(author: &str, user_id: Option<&str>) -> Subscriber {
    let mut args = Map::new();
    args.insert("author".into(), json!(author));
    let context = match user_id {
        Some(id) => ContextSnapshot::authenticated(DEFAULT_GUARD, Principal::new(id)),
        None => ContextSnapshot::anonymous(),
    };
    Subscriber::new(
        ChannelKind::Private,
        FIELD,
        "subscription OnPost($author: ID!) { onPostCreated(author: $author) { id viewer } }",
        context,
    )
    .with_args(args)
    .with_operation_name("OnPost")
}

/// Everything currently buffered on a local hub receiver.
pub fn drain(rx: &mut Receiver<Arc<LocalDelivery>>) -> Vec<Arc<LocalDelivery>> {
    let mut out = Vec::new();
    while let Ok(delivery) = rx.try_recv() {
        out.push(delivery);
    }
    out
}

/// Posts filtered by `author`.
///
/// Resolution reports the principal the guard holds while it runs as
/// `viewer`, and fails on purpose for the subscriber owned by `fail_for`.
/// A `delay_ms` in the root makes it sleep before reading the guard.
pub struct PostsByAuthor {
    pub guards: Arc<Guards>,
}

#[async_trait]
impl SubscriptionDefinition for PostsByAuthor {
    async fn authorize(&self, subscriber: &Subscriber, _request: &RequestMeta) -> bool {
        subscriber.arg("author").is_some()
    }

    async fn filter(&self, subscriber: &Subscriber, root: &Value) -> bool {
        subscriber.arg("author") == root.get("author")
    }

    async fn resolve(&self, root: Value, subscriber: &Subscriber) -> Result<Value, SubscriptionError> {
        let owner = subscriber.context.user().map(|u| json!(u.id));
        if owner.is_some() && root.get("fail_for") == owner.as_ref() {
            return Err(SubscriptionError::Execution("resolver failed".into()));
        }

        if let Some(ms) = root.get("delay_ms").and_then(Value::as_u64) {
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        }

        let viewer = self.guards.default_guard().user().map(|u| u.id);
        let mut value = root;
        if let Value::Object(map) = &mut value {
            map.insert("viewer".into(), json!(viewer));
        }
        Ok(value)
    }
}

pub const PUSH_KEY: &str = "app-key";
pub const PUSH_SECRET: &str = "s3cret";

/// Router and state whose default driver is the signed push service.
/// The service URL is never reached by these tests.
pub async fn push_app() -> (Router, AppState) {
    let connections = json!({
        "push": { "url": "http://127.0.0.1:9", "key": PUSH_KEY, "secret": PUSH_SECRET }
    })
    .to_string();
    let state = test_state_with(&[
        ("SUBSCRIPTIONS_BROADCASTER", "push"),
        ("SUBSCRIPTIONS_BROADCASTER_CONNECTIONS", connections.as_str()),
    ])
    .await;
    let app = subcast::routes::router().with_state(state.clone());
    (app, state)
}

/// A push driver sharing the test credentials, for signing webhook bodies.
pub fn push_signer(state: &AppState) -> PushBroadcaster {
    PushBroadcaster::from_config(
        &json!({ "url": "http://127.0.0.1:9", "key": PUSH_KEY, "secret": PUSH_SECRET }),
        state.storage.clone(),
    )
    .expect("push signer")
}
