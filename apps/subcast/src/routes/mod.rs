pub mod health;
pub mod subscriptions;

use axum::Router;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(subscriptions::router())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Health
        health::health,
        // Subscriptions
        subscriptions::subscribe,
        subscriptions::unsubscribe,
        subscriptions::broadcast,
        subscriptions::authorize_channel,
        subscriptions::webhook,
    ),
    components(
        schemas(
            // Error types
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            // Route request/response types
            health::HealthResponse,
            subscriptions::SubscribeRequest,
            subscriptions::SubscribeResponse,
            subscriptions::BroadcastRequest,
            subscriptions::ChannelAuthBody,
            crate::subscriptions::BroadcastReport,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Subscriptions", description = "GraphQL subscription registration and delivery"),
    )
)]
pub struct ApiDoc;
