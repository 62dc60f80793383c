//! The subscription pub/sub layer.
//!
//! Subscribers are stored per topic by a [`StorageBackend`]. A broadcast loads
//! a topic's subscribers and re-executes each one's document under its own
//! stored identity, fanning out through a [`DeliveryIterator`].

pub mod authorizer;
pub mod broadcaster;
pub mod configured;
pub mod executor;
pub mod iterator;
pub mod registry;
pub mod storage;
pub mod subscriber;

pub use authorizer::SubscriptionAuthorizer;
pub use broadcaster::{BroadcastReport, SubscriptionBroadcaster};
pub use configured::ConfiguredDefinition;
pub use executor::{ExecutionRequest, ExecutionResult, GraphQLError, PassthroughExecutor, QueryExecutor};
pub use iterator::{AuthenticatingIterator, ConcurrentIterator, DeliveryIterator, SyncIterator};
pub use registry::{RequestMeta, SubscriptionDefinition, SubscriptionRegistry};
pub use storage::{CacheStorage, SetStorage, StorageBackend, StorageKeys};
pub use subscriber::{ContextSnapshot, Subscriber, SNAPSHOT_VERSION};
