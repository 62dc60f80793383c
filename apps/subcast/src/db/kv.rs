use async_trait::async_trait;

use crate::error::SubscriptionError;

/// Abstraction over a plain key-value cache: whole values only.
///
/// Backed by Redis in production and an in-memory map in tests. A `ttl_secs`
/// of `None` keeps the value until it is forgotten.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, SubscriptionError>;
    async fn put(
        &self,
        key: &str,
        value: &str,
        ttl_secs: Option<u64>,
    ) -> Result<(), SubscriptionError>;
    async fn forget(&self, key: &str) -> Result<(), SubscriptionError>;
}

/// A store with native, atomic set primitives (Redis command semantics).
///
/// Every set mutation is a single command, so concurrent writers never lose
/// each other's members.
#[async_trait]
pub trait SetStore: Send + Sync {
    /// Returns `true` when `member` was not in the set before.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, SubscriptionError>;
    async fn srem(&self, key: &str, members: &[String]) -> Result<(), SubscriptionError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, SubscriptionError>;
    async fn get(&self, key: &str) -> Result<Option<String>, SubscriptionError>;
    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl_secs: Option<u64>,
    ) -> Result<(), SubscriptionError>;
    /// Values for `keys` in the same order; missing keys yield `None`.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, SubscriptionError>;
    async fn del(&self, key: &str) -> Result<(), SubscriptionError>;
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), SubscriptionError>;
}
