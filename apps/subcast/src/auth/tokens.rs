//! Opaque bearer tokens mapping to a [`Principal`].
//!
//! Tokens are issued by whatever login flow fronts the subscription server and
//! resolved here on every request. They live in the same key-value store as
//! everything else, under `subcast:token:<token>`.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;

use super::Principal;
use crate::db::KeyValueStore;
use crate::error::SubscriptionError;

/// Default token lifetime in seconds (1 hour).
pub const TOKEN_TTL_SECS: u64 = 3600;

/// Generate an opaque random token with the given prefix.
pub fn generate_opaque_token(prefix: &str, bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill(&mut buf[..]);
    format!("{}_{}", prefix, URL_SAFE_NO_PAD.encode(&buf))
}

fn key(token: &str) -> String {
    format!("subcast:token:{}", token)
}

/// Issue a new token for `principal`.
pub async fn issue(
    kv: &dyn KeyValueStore,
    principal: &Principal,
    ttl_secs: u64,
) -> Result<String, SubscriptionError> {
    let token = generate_opaque_token("sct", 32);
    let value = serde_json::to_string(principal)?;
    kv.put(&key(&token), &value, Some(ttl_secs)).await?;
    Ok(token)
}

pub async fn lookup(kv: &dyn KeyValueStore, token: &str) -> Result<Option<Principal>, SubscriptionError> {
    match kv.get(&key(token)).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}
