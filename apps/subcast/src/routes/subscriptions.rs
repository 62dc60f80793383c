//! HTTP surface of the subscription layer.
//!
//! A GraphQL gateway registers parsed subscriptions here, mutation services
//! publish events, and the real-time transport calls back for channel auth
//! and lifecycle webhooks.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use subcast_common::ChannelKind;
use utoipa::ToSchema;

use crate::auth::AuthUser;
use crate::broadcasters::{ChannelAuthRequest, HookRequest};
use crate::error::{ApiError, ApiErrorBody};
use crate::subscriptions::{BroadcastReport, ContextSnapshot, RequestMeta, Subscriber};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/graphql/subscriptions", post(subscribe))
        .route("/graphql/subscriptions/{channel}", delete(unsubscribe))
        .route("/graphql/subscriptions/broadcast", post(broadcast))
        .route("/graphql/subscriptions/auth", post(authorize_channel))
        .route("/graphql/subscriptions/webhook", post(webhook))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubscribeRequest {
    pub field_name: String,
    pub query: String,
    #[serde(default)]
    pub operation_name: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub variables: Map<String, Value>,
    /// Resolved field arguments, used by filters.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub args: Map<String, Value>,
    /// Presence channels also report who is listening.
    #[serde(default)]
    pub presence: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubscribeResponse {
    pub channel: String,
    pub topic: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BroadcastRequest {
    pub field_name: String,
    /// Resolved value of the subscription field for this event.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub root: Value,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChannelAuthBody {
    pub channel_name: String,
    #[serde(default)]
    pub socket_id: Option<String>,
}

// ---------------------------------------------------------------------------
// POST /graphql/subscriptions
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/graphql/subscriptions",
    tag = "Subscriptions",
    request_body = SubscribeRequest,
    responses(
        (status = 201, description = "Subscriber stored", body = SubscribeResponse),
        (status = 401, description = "Invalid bearer token", body = ApiErrorBody),
        (status = 403, description = "Subscription not authorized", body = ApiErrorBody),
        (status = 404, description = "Unknown subscription field", body = ApiErrorBody),
    ),
)]
pub async fn subscribe(
    State(state): State<AppState>,
    meta: RequestMeta,
    Json(body): Json<SubscribeRequest>,
) -> Result<(StatusCode, Json<SubscribeResponse>), ApiError> {
    let context = match &meta.user {
        Some(user) => ContextSnapshot::authenticated(state.guards.default_name(), user.clone()),
        None => ContextSnapshot::anonymous(),
    };
    let kind = if body.presence {
        ChannelKind::Presence
    } else {
        ChannelKind::Private
    };

    let mut subscriber = Subscriber::new(kind, body.field_name, body.query, context)
        .with_args(body.args)
        .with_variables(body.variables);
    if let Some(name) = body.operation_name {
        subscriber = subscriber.with_operation_name(name);
    }

    if !state.subscriptions.subscribe(&mut subscriber, &meta).await? {
        return Err(ApiError::forbidden("Subscription not authorized"));
    }

    let topic = subscriber.topic.unwrap_or_default();
    Ok((
        StatusCode::CREATED,
        Json(SubscribeResponse {
            channel: subscriber.channel,
            topic,
        }),
    ))
}

// ---------------------------------------------------------------------------
// DELETE /graphql/subscriptions/:channel
// ---------------------------------------------------------------------------

#[utoipa::path(
    delete,
    path = "/graphql/subscriptions/{channel}",
    tag = "Subscriptions",
    params(("channel" = String, Path, description = "Subscriber channel")),
    responses(
        (status = 204, description = "Subscriber removed"),
        (status = 404, description = "No such channel", body = ApiErrorBody),
    ),
)]
pub async fn unsubscribe(
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.subscriptions.unsubscribe(&channel).await? {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(ApiError::not_found("Subscription not found")),
    }
}

// ---------------------------------------------------------------------------
// POST /graphql/subscriptions/broadcast
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/graphql/subscriptions/broadcast",
    tag = "Subscriptions",
    security(("bearer" = [])),
    request_body = BroadcastRequest,
    responses(
        (status = 200, description = "Broadcast delivered", body = BroadcastReport),
        (status = 202, description = "Broadcast queued"),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 404, description = "Unknown subscription field", body = ApiErrorBody),
    ),
)]
pub async fn broadcast(
    State(state): State<AppState>,
    AuthUser(issuer): AuthUser,
    Json(body): Json<BroadcastRequest>,
) -> Result<Response, ApiError> {
    tracing::debug!(issuer = %issuer.id, field = %body.field_name, "broadcast requested");

    match state.subscriptions.dispatch(&body.field_name, body.root).await? {
        Some(report) => Ok(Json(report).into_response()),
        None => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "queued": true })),
        )
            .into_response()),
    }
}

// ---------------------------------------------------------------------------
// POST /graphql/subscriptions/auth
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/graphql/subscriptions/auth",
    tag = "Subscriptions",
    request_body = ChannelAuthBody,
    responses(
        (status = 200, description = "Channel authorized; body shape depends on the broadcaster"),
        (status = 403, description = "Channel refused"),
    ),
)]
pub async fn authorize_channel(
    State(state): State<AppState>,
    mut meta: RequestMeta,
    Json(body): Json<ChannelAuthBody>,
) -> Result<Response, ApiError> {
    meta.socket_id = body.socket_id;
    let request = ChannelAuthRequest {
        channel: body.channel_name,
        meta,
    };
    Ok(state.authorizer.authorize(request).await?)
}

// ---------------------------------------------------------------------------
// POST /graphql/subscriptions/webhook
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/graphql/subscriptions/webhook",
    tag = "Subscriptions",
    responses(
        (status = 200, description = "Webhook handled"),
        (status = 400, description = "Malformed payload", body = ApiErrorBody),
        (status = 401, description = "Invalid signature", body = ApiErrorBody),
    ),
)]
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let driver = state.broadcasters.default_driver()?;
    Ok(driver.hook(HookRequest { headers, body }).await?)
}
