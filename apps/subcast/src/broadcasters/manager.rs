//! Name -> driver resolution for broadcasters.
//!
//! Factories are registered up front; drivers are built on first use and then
//! cached. Resolving a name with no factory, or a factory that fails, is an
//! `InvalidDriver` error at resolution time.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use super::local::{LocalBroadcaster, DEFAULT_CAPACITY};
use super::log::LogBroadcaster;
use super::push::PushBroadcaster;
use super::Broadcaster;
use crate::config::BroadcasterSettings;
use crate::error::SubscriptionError;
use crate::subscriptions::storage::StorageBackend;

/// What a factory gets to build its driver.
pub struct DriverContext {
    pub name: String,
    /// The driver's nested config map.
    pub config: Value,
    pub storage: Arc<dyn StorageBackend>,
}

pub type DriverFactory =
    Arc<dyn Fn(&DriverContext) -> Result<Arc<dyn Broadcaster>, SubscriptionError> + Send + Sync>;

pub struct BroadcastManager {
    settings: BroadcasterSettings,
    storage: Arc<dyn StorageBackend>,
    local: LocalBroadcaster,
    factories: DashMap<String, DriverFactory>,
    drivers: DashMap<String, Arc<dyn Broadcaster>>,
}

impl BroadcastManager {
    /// Manager with the built-in `log`, `local` and `push` drivers.
    pub fn new(settings: BroadcasterSettings, storage: Arc<dyn StorageBackend>) -> Self {
        let capacity = settings
            .connection("local")
            .get("capacity")
            .and_then(Value::as_u64)
            .map(|c| c as usize)
            .unwrap_or(DEFAULT_CAPACITY);
        let local = LocalBroadcaster::new(capacity);

        let manager = Self {
            settings,
            storage,
            local: local.clone(),
            factories: DashMap::new(),
            drivers: DashMap::new(),
        };

        manager.extend("log", |_| Ok(Arc::new(LogBroadcaster)));
        manager.extend("local", move |_| Ok(Arc::new(local.clone())));
        manager.extend("push", |ctx| {
            let driver = PushBroadcaster::from_config(&ctx.config, ctx.storage.clone())?;
            Ok(Arc::new(driver))
        });
        manager
    }

    /// Register or replace a driver factory. A cached driver of the same name
    /// is dropped so the next resolution uses the new factory.
    pub fn extend<F>(&self, name: &str, factory: F)
    where
        F: Fn(&DriverContext) -> Result<Arc<dyn Broadcaster>, SubscriptionError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
        self.drivers.remove(name);
    }

    pub fn default_name(&self) -> &str {
        &self.settings.driver
    }

    /// Resolve a driver by name, building it on first use.
    pub fn driver(&self, name: &str) -> Result<Arc<dyn Broadcaster>, SubscriptionError> {
        if let Some(driver) = self.drivers.get(name) {
            return Ok(driver.value().clone());
        }

        let factory = self
            .factories
            .get(name)
            .map(|f| f.value().clone())
            .ok_or_else(|| {
                SubscriptionError::InvalidDriver(format!("no broadcaster driver named `{name}`"))
            })?;

        let context = DriverContext {
            name: name.to_string(),
            config: self.settings.connection(name),
            storage: self.storage.clone(),
        };
        let driver = factory(&context).map_err(|err| match err {
            SubscriptionError::InvalidDriver(_) => err,
            other => SubscriptionError::InvalidDriver(format!("`{name}`: {other}")),
        })?;

        tracing::info!(driver = %name, "broadcaster driver resolved");
        Ok(self
            .drivers
            .entry(name.to_string())
            .or_insert(driver)
            .value()
            .clone())
    }

    pub fn default_driver(&self) -> Result<Arc<dyn Broadcaster>, SubscriptionError> {
        self.driver(&self.settings.driver)
    }

    /// Resolve the default driver now so a bad configuration fails at startup.
    pub fn validate(&self) -> Result<(), SubscriptionError> {
        self.default_driver().map(|_| ())
    }

    /// Hub feeding this process's websocket sessions.
    pub fn local(&self) -> &LocalBroadcaster {
        &self.local
    }
}
