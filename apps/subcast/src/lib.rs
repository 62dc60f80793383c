pub mod auth;
pub mod broadcasters;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod subscriptions;

use std::sync::Arc;

use auth::Guards;
use broadcasters::{BroadcastDispatcher, BroadcastManager};
use config::{Config, StorageDriver};
use db::{KeyValueStore, MemoryStore, RedisStore};
use error::SubscriptionError;
use subscriptions::{
    ConfiguredDefinition, QueryExecutor, StorageBackend, SubscriptionAuthorizer,
    SubscriptionBroadcaster, SubscriptionRegistry,
};

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Bearer token -> principal lookups.
    pub tokens: Arc<dyn KeyValueStore>,
    pub guards: Arc<Guards>,
    pub registry: Arc<SubscriptionRegistry>,
    pub storage: Arc<dyn StorageBackend>,
    pub broadcasters: Arc<BroadcastManager>,
    pub subscriptions: SubscriptionBroadcaster,
    pub authorizer: Arc<SubscriptionAuthorizer>,
}

impl AppState {
    /// Connect the configured stores and wire everything together.
    pub async fn connect(
        config: Config,
        executor: Arc<dyn QueryExecutor>,
    ) -> Result<Self, SubscriptionError> {
        let storage = subscriptions::storage::connect(&config.storage).await?;
        let tokens: Arc<dyn KeyValueStore> = match &config.storage.driver {
            StorageDriver::Memory => Arc::new(MemoryStore::new()),
            StorageDriver::Redis { url } => Arc::new(RedisStore::connect(url).await?),
        };
        Self::assemble(config, storage, tokens, executor)
    }

    /// Wire already-built stores together. Resolves the default broadcaster
    /// driver eagerly, so a bad driver configuration fails here.
    ///
    /// Fields named in the configuration are registered with a
    /// [`ConfiguredDefinition`]; callers may replace them afterwards.
    pub fn assemble(
        config: Config,
        storage: Arc<dyn StorageBackend>,
        tokens: Arc<dyn KeyValueStore>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Result<Self, SubscriptionError> {
        let guards = Arc::new(Guards::default());
        let registry = Arc::new(SubscriptionRegistry::new());
        let configured = Arc::new(ConfiguredDefinition::new(config.definitions.access));
        for field in &config.definitions.fields {
            registry.register(configured.clone(), field);
        }
        let broadcasters = Arc::new(BroadcastManager::new(
            config.broadcaster.clone(),
            storage.clone(),
        ));
        broadcasters.validate()?;

        let iterator = subscriptions::iterator::build(&config.delivery, guards.clone());
        let subscriptions = SubscriptionBroadcaster::new(
            registry.clone(),
            storage.clone(),
            executor,
            Arc::new(BroadcastDispatcher::new(broadcasters.clone())),
            iterator,
            config.delivery.clone(),
        );
        let authorizer = Arc::new(SubscriptionAuthorizer::new(
            registry.clone(),
            storage.clone(),
            broadcasters.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            tokens,
            guards,
            registry,
            storage,
            broadcasters,
            subscriptions,
            authorizer,
        })
    }
}
