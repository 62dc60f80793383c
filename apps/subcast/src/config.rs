use std::time::Duration;

use serde_json::{Map, Value};

use crate::error::SubscriptionError;

/// Which storage backend keeps the subscriber directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackendKind {
    /// Read-modify-write JSON lists over a plain key-value cache.
    Cache,
    /// Native atomic set commands.
    Sets,
}

/// Where the backend's data physically lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageDriver {
    /// Process-local; only valid for a single process and for tests.
    Memory,
    Redis { url: String },
}

impl StorageDriver {
    pub fn name(&self) -> &'static str {
        match self {
            StorageDriver::Memory => "memory",
            StorageDriver::Redis { .. } => "redis",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub driver: StorageDriver,
    pub backend: StorageBackendKind,
    /// Key prefix, e.g. `graphql` -> `graphql.subscriber.<channel>`.
    pub prefix: String,
    /// `None` keeps subscribers until they are deleted.
    pub ttl_secs: Option<u64>,
}

impl StorageSettings {
    pub fn memory(backend: StorageBackendKind) -> Self {
        Self {
            driver: StorageDriver::Memory,
            backend,
            prefix: DEFAULT_PREFIX.to_string(),
            ttl_secs: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BroadcasterSettings {
    /// Name of the default broadcaster driver.
    pub driver: String,
    /// Nested config map per driver name.
    pub connections: Map<String, Value>,
}

impl BroadcasterSettings {
    pub fn connection(&self, driver: &str) -> Value {
        self.connections
            .get(driver)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }
}

/// Fan-out policy used by the broadcaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorKind {
    Sync,
    Authenticating,
    Concurrent,
}

#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub iterator: IteratorKind,
    /// Upper bound on in-flight deliveries for the concurrent iterator.
    pub concurrency: usize,
    /// Per-subscriber bound on resolve + dispatch.
    pub timeout: Duration,
    /// Run broadcasts on a background task instead of inline.
    pub queue_broadcasts: bool,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            iterator: IteratorKind::Authenticating,
            concurrency: 8,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            queue_broadcasts: false,
        }
    }
}

/// Who may subscribe to a field registered from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FieldAccess {
    Public,
    #[default]
    Authenticated,
}

/// Subscription fields the server serves without an embedding application.
#[derive(Debug, Clone, Default)]
pub struct DefinitionSettings {
    pub fields: Vec<String>,
    pub access: FieldAccess,
}

/// Subscription server configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    pub storage: StorageSettings,
    pub broadcaster: BroadcasterSettings,
    pub delivery: DeliverySettings,
    pub definitions: DefinitionSettings,
}

const DEFAULT_PORT: u16 = 4010;
const DEFAULT_PREFIX: &str = "graphql";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Malformed values are configuration errors; nothing is silently defaulted.
    pub fn from_env() -> Result<Self, SubscriptionError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SubscriptionError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let port = match var("PORT") {
            Some(raw) => parse_number("PORT", &raw)?,
            None => DEFAULT_PORT,
        };

        let driver = match (var("SUBSCRIPTIONS_STORAGE_DRIVER").as_deref(), var("REDIS_URL")) {
            (Some("memory"), _) | (None, None) => StorageDriver::Memory,
            (Some("redis") | None, Some(url)) => StorageDriver::Redis { url },
            (Some("redis"), None) => {
                return Err(SubscriptionError::InvalidConfig(
                    "SUBSCRIPTIONS_STORAGE_DRIVER=redis requires REDIS_URL".into(),
                ))
            }
            (Some(other), _) => {
                return Err(SubscriptionError::InvalidConfig(format!(
                    "unknown storage driver `{other}`"
                )))
            }
        };

        let backend = match var("SUBSCRIPTIONS_STORAGE_BACKEND").as_deref() {
            None | Some("sets") => StorageBackendKind::Sets,
            Some("cache") => StorageBackendKind::Cache,
            Some(other) => {
                return Err(SubscriptionError::InvalidConfig(format!(
                    "unknown storage backend `{other}`"
                )))
            }
        };

        let storage = StorageSettings {
            driver,
            backend,
            prefix: var("SUBSCRIPTIONS_KEY_PREFIX").unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
            ttl_secs: parse_ttl(lookup("SUBSCRIPTIONS_STORAGE_TTL").as_deref())?,
        };

        let connections = match var("SUBSCRIPTIONS_BROADCASTER_CONNECTIONS") {
            Some(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => map,
                _ => {
                    return Err(SubscriptionError::InvalidConfig(
                        "SUBSCRIPTIONS_BROADCASTER_CONNECTIONS must be a JSON object".into(),
                    ))
                }
            },
            None => Map::new(),
        };

        let broadcaster = BroadcasterSettings {
            driver: var("SUBSCRIPTIONS_BROADCASTER").unwrap_or_else(|| "log".to_string()),
            connections,
        };

        let iterator = match var("SUBSCRIPTIONS_ITERATOR").as_deref() {
            None | Some("auth") => IteratorKind::Authenticating,
            Some("sync") => IteratorKind::Sync,
            Some("concurrent") => IteratorKind::Concurrent,
            Some(other) => {
                return Err(SubscriptionError::InvalidConfig(format!(
                    "unknown delivery iterator `{other}`"
                )))
            }
        };

        let defaults = DeliverySettings::default();
        let delivery = DeliverySettings {
            iterator,
            concurrency: match var("SUBSCRIPTIONS_CONCURRENCY") {
                Some(raw) => parse_number::<usize>("SUBSCRIPTIONS_CONCURRENCY", &raw)?.max(1),
                None => defaults.concurrency,
            },
            timeout: match var("SUBSCRIPTIONS_DELIVERY_TIMEOUT_MS") {
                Some(raw) => Duration::from_millis(parse_number("SUBSCRIPTIONS_DELIVERY_TIMEOUT_MS", &raw)?),
                None => defaults.timeout,
            },
            queue_broadcasts: match var("SUBSCRIPTIONS_QUEUE_BROADCASTS").as_deref() {
                None | Some("false") | Some("0") => false,
                Some("true") | Some("1") => true,
                Some(other) => {
                    return Err(SubscriptionError::InvalidConfig(format!(
                        "SUBSCRIPTIONS_QUEUE_BROADCASTS must be a boolean, got `{other}`"
                    )))
                }
            },
        };

        let definitions = DefinitionSettings {
            fields: match var("SUBSCRIPTIONS_FIELDS") {
                Some(raw) => parse_fields(&raw)?,
                None => Vec::new(),
            },
            access: match var("SUBSCRIPTIONS_FIELD_ACCESS").as_deref() {
                None | Some("authenticated") => FieldAccess::Authenticated,
                Some("public") => FieldAccess::Public,
                Some(other) => {
                    return Err(SubscriptionError::InvalidConfig(format!(
                        "unknown field access `{other}`"
                    )))
                }
            },
        };

        Ok(Self {
            port,
            storage,
            broadcaster,
            delivery,
            definitions,
        })
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, SubscriptionError> {
    raw.trim().parse().map_err(|_| {
        SubscriptionError::InvalidConfig(format!("{name} must be a non-negative integer, got `{raw}`"))
    })
}

/// Comma-separated GraphQL field names, e.g. `onPostCreated, onCommentAdded`.
fn parse_fields(raw: &str) -> Result<Vec<String>, SubscriptionError> {
    let mut fields: Vec<String> = Vec::new();
    for field in raw.split(',').map(str::trim).filter(|f| !f.is_empty()) {
        let valid = field.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
            && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(SubscriptionError::InvalidConfig(format!(
                "SUBSCRIPTIONS_FIELDS: `{field}` is not a GraphQL field name"
            )));
        }
        if !fields.iter().any(|f| f == field) {
            fields.push(field.to_string());
        }
    }
    Ok(fields)
}

/// Longest TTL accepted, in seconds. Redis keeps expiries as signed 64-bit.
pub const MAX_TTL_SECS: u64 = i64::MAX as u64;

/// Parse a TTL read from the environment: absent, empty or `null` mean forever.
///
/// Zero is rejected since Redis refuses a zero expiry.
pub fn parse_ttl(raw: Option<&str>) -> Result<Option<u64>, SubscriptionError> {
    let secs: u64 = match raw.map(str::trim) {
        None | Some("") | Some("null") => return Ok(None),
        Some(raw) => parse_number("SUBSCRIPTIONS_STORAGE_TTL", raw)?,
    };
    if secs == 0 || secs > MAX_TTL_SECS {
        return Err(SubscriptionError::InvalidConfig(format!(
            "SUBSCRIPTIONS_STORAGE_TTL must be between 1 and {MAX_TTL_SECS} seconds, got {secs}"
        )));
    }
    Ok(Some(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, SubscriptionError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = load(&[]).unwrap();
        assert_eq!(config.port, 4010);
        assert_eq!(config.storage.driver, StorageDriver::Memory);
        assert_eq!(config.storage.backend, StorageBackendKind::Sets);
        assert_eq!(config.storage.prefix, "graphql");
        assert_eq!(config.storage.ttl_secs, None);
        assert_eq!(config.broadcaster.driver, "log");
        assert_eq!(config.delivery.iterator, IteratorKind::Authenticating);
        assert!(!config.delivery.queue_broadcasts);
    }

    #[test]
    fn redis_url_selects_redis_driver() {
        let config = load(&[("REDIS_URL", "redis://localhost:6379/0")]).unwrap();
        assert_eq!(
            config.storage.driver,
            StorageDriver::Redis {
                url: "redis://localhost:6379/0".into()
            }
        );
    }

    #[test]
    fn redis_driver_without_url_is_rejected() {
        let err = load(&[("SUBSCRIPTIONS_STORAGE_DRIVER", "redis")]).unwrap_err();
        assert!(matches!(err, SubscriptionError::InvalidConfig(_)));
    }

    #[test]
    fn ttl_shapes() {
        assert_eq!(parse_ttl(None).unwrap(), None);
        assert_eq!(parse_ttl(Some("null")).unwrap(), None);
        assert_eq!(parse_ttl(Some(" 3600 ")).unwrap(), Some(3600));
        assert!(parse_ttl(Some("an hour")).is_err());
        assert!(parse_ttl(Some("-5")).is_err());

        assert!(parse_ttl(Some("0")).is_err());
        assert!(parse_ttl(Some("18446744073709551615")).is_err());
        assert!(parse_ttl(Some("9223372036854775808")).is_err());
        assert_eq!(
            parse_ttl(Some("9223372036854775807")).unwrap(),
            Some(MAX_TTL_SECS)
        );
    }

    #[test]
    fn zero_ttl_fails_loading() {
        let err = load(&[("SUBSCRIPTIONS_STORAGE_TTL", "0")]).unwrap_err();
        assert!(matches!(err, SubscriptionError::InvalidConfig(_)));
    }

    #[test]
    fn configured_fields_parse() {
        let config = load(&[]).unwrap();
        assert!(config.definitions.fields.is_empty());
        assert_eq!(config.definitions.access, FieldAccess::Authenticated);

        let config = load(&[
            ("SUBSCRIPTIONS_FIELDS", " onPostCreated, onCommentAdded,,onPostCreated "),
            ("SUBSCRIPTIONS_FIELD_ACCESS", "public"),
        ])
        .unwrap();
        assert_eq!(config.definitions.fields, vec!["onPostCreated", "onCommentAdded"]);
        assert_eq!(config.definitions.access, FieldAccess::Public);

        assert!(load(&[("SUBSCRIPTIONS_FIELDS", "onPost-Created")]).is_err());
        assert!(load(&[("SUBSCRIPTIONS_FIELDS", "1stField")]).is_err());
        assert!(load(&[("SUBSCRIPTIONS_FIELD_ACCESS", "everyone")]).is_err());
    }

    #[test]
    fn malformed_ttl_fails_loading() {
        let err = load(&[("SUBSCRIPTIONS_STORAGE_TTL", "forever")]).unwrap_err();
        assert!(matches!(err, SubscriptionError::InvalidConfig(_)));
    }

    #[test]
    fn broadcaster_connections_must_be_an_object() {
        assert!(load(&[("SUBSCRIPTIONS_BROADCASTER_CONNECTIONS", "[1,2]")]).is_err());

        let config = load(&[(
            "SUBSCRIPTIONS_BROADCASTER_CONNECTIONS",
            r#"{"push": {"endpoint": "http://localhost:6001", "key": "k", "secret": "s"}}"#,
        )])
        .unwrap();
        assert_eq!(config.broadcaster.connection("push")["key"], "k");
        assert!(config.broadcaster.connection("log").as_object().unwrap().is_empty());
    }

    #[test]
    fn delivery_settings_parse() {
        let config = load(&[
            ("SUBSCRIPTIONS_ITERATOR", "concurrent"),
            ("SUBSCRIPTIONS_CONCURRENCY", "0"),
            ("SUBSCRIPTIONS_DELIVERY_TIMEOUT_MS", "250"),
            ("SUBSCRIPTIONS_QUEUE_BROADCASTS", "true"),
        ])
        .unwrap();
        assert_eq!(config.delivery.iterator, IteratorKind::Concurrent);
        assert_eq!(config.delivery.concurrency, 1);
        assert_eq!(config.delivery.timeout, Duration::from_millis(250));
        assert!(config.delivery.queue_broadcasts);

        assert!(load(&[("SUBSCRIPTIONS_ITERATOR", "parallel")]).is_err());
        assert!(load(&[("SUBSCRIPTIONS_QUEUE_BROADCASTS", "yes")]).is_err());
    }
}
