//! Boundary to the GraphQL execution engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::subscriber::{ContextSnapshot, Subscriber};
use crate::error::SubscriptionError;

/// Everything needed to re-run one subscriber's selection set.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub query: String,
    pub operation_name: Option<String>,
    pub variables: Map<String, Value>,
    /// Subscription field whose value is `root_value`.
    pub field_name: String,
    pub root_value: Value,
    pub context: ContextSnapshot,
}

impl ExecutionRequest {
    pub fn for_subscriber(subscriber: &Subscriber, root_value: Value) -> Self {
        Self {
            query: subscriber.query.clone(),
            operation_name: subscriber.operation_name.clone(),
            variables: subscriber.variables.clone(),
            field_name: subscriber.field_name.clone(),
            root_value,
            context: subscriber.context.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<Value>,
}

/// Standard GraphQL response shape. Field errors travel inside the payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
}

impl ExecutionResult {
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }
}

/// Executes a document against the live schema.
///
/// `Err` is reserved for failures of the engine itself; GraphQL field errors
/// belong in [`ExecutionResult::errors`].
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, SubscriptionError>;
}

/// Executor used when no schema is wired in: answers with the root value
/// under the field name, ignoring the selection set.
pub struct PassthroughExecutor;

#[async_trait]
impl QueryExecutor for PassthroughExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, SubscriptionError> {
        let mut data = Map::new();
        data.insert(request.field_name, request.root_value);
        Ok(ExecutionResult::data(Value::Object(data)))
    }
}
