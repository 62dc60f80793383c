//! Storage drivers underneath the subscription backends.

pub mod kv;
pub mod memory;
pub mod redis;

pub use kv::{KeyValueStore, SetStore};
pub use memory::MemoryStore;
pub use self::redis::RedisStore;
