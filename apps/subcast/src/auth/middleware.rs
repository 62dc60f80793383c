//! Request identity extraction.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::{tokens, Principal};
use crate::subscriptions::RequestMeta;
use crate::AppState;

/// Rejection returned when a bearer token is present but unusable.
#[derive(Debug)]
pub struct AuthError {
    message: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": "UNAUTHORIZED",
                "message": self.message
            }
        });
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

async fn bearer_user(parts: &Parts, state: &AppState) -> Result<Option<Principal>, AuthError> {
    let Some(header) = parts.headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let header = header.to_str().map_err(|_| AuthError {
        message: "Invalid Authorization header format",
    })?;
    let token = header.strip_prefix("Bearer ").ok_or(AuthError {
        message: "Invalid Authorization header format",
    })?;

    let principal = tokens::lookup(state.tokens.as_ref(), token)
        .await
        .map_err(|e| {
            tracing::error!(?e, "token lookup failed");
            AuthError {
                message: "Token lookup failed",
            }
        })?
        .ok_or(AuthError {
            message: "Invalid or expired token",
        })?;
    Ok(Some(principal))
}

/// Headers plus the bearer principal, if the request carried one.
impl FromRequestParts<AppState> for RequestMeta {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(RequestMeta {
            headers: parts.headers.clone(),
            user: bearer_user(parts, state).await?,
            socket_id: None,
        })
    }
}

/// A request that must carry a valid bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Principal);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        bearer_user(parts, state).await?.map(AuthUser).ok_or(AuthError {
            message: "Missing Authorization header",
        })
    }
}
