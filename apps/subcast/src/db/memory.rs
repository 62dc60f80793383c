//! In-memory store implementing both storage driver boundaries.
//!
//! Single-process only: useful for tests and local development, never shared
//! between server processes.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::kv::{KeyValueStore, SetStore};
use crate::error::SubscriptionError;

struct Expiring<T> {
    value: T,
    expires_at: Option<Instant>,
}

/// `None` when the deadline is past what `Instant` can hold; such entries
/// simply never expire.
fn deadline(ttl_secs: u64) -> Option<Instant> {
    Instant::now().checked_add(Duration::from_secs(ttl_secs))
}

impl<T> Expiring<T> {
    fn new(value: T, ttl_secs: Option<u64>) -> Self {
        Self {
            value,
            expires_at: ttl_secs.and_then(deadline),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Default)]
struct Data {
    values: HashMap<String, Expiring<String>>,
    sets: HashMap<String, Expiring<HashSet<String>>>,
}

impl Data {
    fn value(&mut self, key: &str) -> Option<String> {
        let now = Instant::now();
        match self.values.get(key).map(|entry| entry.is_live(now)) {
            Some(true) => self.values.get(key).map(|entry| entry.value.clone()),
            Some(false) => {
                self.values.remove(key);
                None
            }
            None => None,
        }
    }

    fn set_mut(&mut self, key: &str) -> Option<&mut Expiring<HashSet<String>>> {
        let now = Instant::now();
        if self.sets.get(key).is_some_and(|entry| !entry.is_live(now)) {
            self.sets.remove(key);
        }
        self.sets.get_mut(key)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<Data>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SubscriptionError> {
        Ok(self.data.lock().value(key))
    }

    async fn put(
        &self,
        key: &str,
        value: &str,
        ttl_secs: Option<u64>,
    ) -> Result<(), SubscriptionError> {
        self.data
            .lock()
            .values
            .insert(key.to_string(), Expiring::new(value.to_string(), ttl_secs));
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<(), SubscriptionError> {
        self.data.lock().values.remove(key);
        Ok(())
    }
}

#[async_trait]
impl SetStore for MemoryStore {
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, SubscriptionError> {
        let mut data = self.data.lock();
        if let Some(set) = data.set_mut(key) {
            return Ok(set.value.insert(member.to_string()));
        }
        let members = HashSet::from([member.to_string()]);
        data.sets.insert(key.to_string(), Expiring::new(members, None));
        Ok(true)
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<(), SubscriptionError> {
        let mut data = self.data.lock();
        let now_empty = match data.set_mut(key) {
            Some(set) => {
                for member in members {
                    set.value.remove(member);
                }
                set.value.is_empty()
            }
            None => false,
        };
        // Redis drops a set once its last member is removed.
        if now_empty {
            data.sets.remove(key);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, SubscriptionError> {
        let mut data = self.data.lock();
        Ok(data
            .set_mut(key)
            .map(|set| set.value.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, SubscriptionError> {
        Ok(self.data.lock().value(key))
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl_secs: Option<u64>,
    ) -> Result<(), SubscriptionError> {
        KeyValueStore::put(self, key, value, ttl_secs).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, SubscriptionError> {
        let mut data = self.data.lock();
        Ok(keys.iter().map(|key| data.value(key)).collect())
    }

    async fn del(&self, key: &str) -> Result<(), SubscriptionError> {
        let mut data = self.data.lock();
        data.values.remove(key);
        data.sets.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), SubscriptionError> {
        let mut data = self.data.lock();
        let expires_at = deadline(ttl_secs);
        if let Some(set) = data.set_mut(key) {
            set.expires_at = expires_at;
        } else if let Some(value) = data.values.get_mut(key) {
            value.expires_at = expires_at;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn values_round_trip_and_forget() {
        let store = MemoryStore::new();
        store.put("k", "v", None).await.unwrap();
        assert_eq!(KeyValueStore::get(&store, "k").await.unwrap().as_deref(), Some("v"));

        store.forget("k").await.unwrap();
        assert!(KeyValueStore::get(&store, "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn values_expire_after_ttl() {
        let store = MemoryStore::new();
        store.put("short", "v", Some(1)).await.unwrap();
        store.put("forever", "v", None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert!(KeyValueStore::get(&store, "short").await.unwrap().is_none());
        assert!(KeyValueStore::get(&store, "forever").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn set_members_add_and_remove() {
        let store = MemoryStore::new();
        assert!(store.sadd("s", "a").await.unwrap());
        assert!(store.sadd("s", "b").await.unwrap());
        assert!(!store.sadd("s", "a").await.unwrap());

        let mut members = store.smembers("s").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a", "b"]);

        store.srem("s", &["a".to_string(), "zzz".to_string()]).await.unwrap();
        assert_eq!(store.smembers("s").await.unwrap(), vec!["b"]);

        store.srem("s", &["b".to_string()]).await.unwrap();
        assert!(store.smembers("s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mget_preserves_order_and_gaps() {
        let store = MemoryStore::new();
        store.set("a", "1", None).await.unwrap();
        store.set("c", "3", None).await.unwrap();

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let values = store.mget(&keys).await.unwrap();
        assert_eq!(values, vec![Some("1".into()), None, Some("3".into())]);
    }

    #[tokio::test]
    async fn expire_applies_to_sets() {
        let store = MemoryStore::new();
        store.sadd("s", "a").await.unwrap();
        store.expire("s", 1).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(store.smembers("s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn huge_ttls_never_expire_instead_of_overflowing() {
        let store = MemoryStore::new();
        store.put("k", "v", Some(u64::MAX)).await.unwrap();
        store.sadd("s", "a").await.unwrap();
        store.expire("s", u64::MAX).await.unwrap();

        assert_eq!(KeyValueStore::get(&store, "k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.smembers("s").await.unwrap(), vec!["a"]);
    }
}
