//! Node behavior contracts
//!
//! Processors, routers and predealers are supplied by the embedding
//! application and looked up by name through a [`NodeRegistry`]. The engine
//! only ever calls through these traits.

pub mod builtin;
pub mod registry;

use crate::core::Context;
use crate::execution::Pipeline;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use thiserror::Error;

pub use registry::NodeRegistry;

/// Failure raised by a node behavior
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct NodeError {
    pub message: String,
}

impl NodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn timed_out(limit: Duration) -> Self {
        Self::new(format!("Timeout after {} seconds", limit.as_secs_f64()))
    }

    /// Value handed to an exception router in place of the node output
    pub fn to_value(&self, node_id: &str) -> Value {
        json!({ "error": self.message, "node_id": node_id })
    }
}

impl From<&str> for NodeError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for NodeError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<anyhow::Error> for NodeError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{:#}", err))
    }
}

/// Result of a processor call
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// The node finished with this value
    Value(Value),
    /// The result arrives later through [`Pipeline::complete`]; see
    /// [`NodeCall::defer`]
    Deferred,
}

impl From<Value> for Output {
    fn from(value: Value) -> Self {
        Output::Value(value)
    }
}

/// Everything a behavior learns about the call besides input and context
#[derive(Clone, Copy)]
pub struct NodeCall<'a> {
    /// Handle to the engine driving the run
    pub engine: &'a Pipeline,
    pub run_id: &'a str,
    pub node_id: &'a str,
    /// Static arguments from the node configuration
    pub args: &'a Map<String, Value>,
}

impl<'a> NodeCall<'a> {
    pub fn arg(&self, key: &str) -> Option<&'a Value> {
        self.args.get(key)
    }

    /// Get an argument or fail the node
    pub fn require_arg(&self, key: &str) -> Result<&'a Value, NodeError> {
        self.args
            .get(key)
            .ok_or_else(|| NodeError::new(format!("Missing argument '{}' on node {}", key, self.node_id)))
    }

    /// Announce that this call will return [`Output::Deferred`]
    ///
    /// Call it before handing the run id to whatever produces the result.
    /// A [`Pipeline::complete`] that lands before the processor returns is
    /// then held for the step; without the announcement it is rejected with
    /// `NotAwaitingCompletion`.
    pub async fn defer(&self) -> Output {
        self.engine.expect_completion(self.run_id).await;
        Output::Deferred
    }

    /// Get an argument as a node id (strings and integers are accepted)
    pub fn node_id_arg(&self, key: &str) -> Result<Option<String>, NodeError> {
        match self.arg(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(id)) => Ok(Some(id.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(NodeError::new(format!(
                "Argument '{}' on node {} is not a node id: {}",
                key, self.node_id, other
            ))),
        }
    }
}

/// Transforms `(input, context)` into an output
#[async_trait]
pub trait Processor: Send + Sync {
    async fn execute(
        &self,
        input: Value,
        context: &mut Context,
        call: NodeCall<'_>,
    ) -> Result<Output, NodeError>;
}

/// Picks the next node from `(output, context)`; `None` ends the run
#[async_trait]
pub trait Router: Send + Sync {
    async fn next(
        &self,
        output: &Value,
        context: &mut Context,
        call: NodeCall<'_>,
    ) -> Result<Option<String>, NodeError>;
}

/// Gate deciding whether the processor of a node runs at all
#[async_trait]
pub trait Predealer: Send + Sync {
    async fn pre_deal(
        &self,
        input: &Value,
        context: &mut Context,
        call: NodeCall<'_>,
    ) -> Result<bool, NodeError>;
}

/// Adapter turning a plain closure into a [`Processor`]
pub struct FnProcessor<F>(pub F);

#[async_trait]
impl<F> Processor for FnProcessor<F>
where
    F: Fn(Value, &mut Context, &NodeCall<'_>) -> Result<Value, NodeError> + Send + Sync,
{
    async fn execute(
        &self,
        input: Value,
        context: &mut Context,
        call: NodeCall<'_>,
    ) -> Result<Output, NodeError> {
        (self.0)(input, context, &call).map(Output::Value)
    }
}

/// Adapter turning a plain closure into a [`Router`]
pub struct FnRouter<F>(pub F);

#[async_trait]
impl<F> Router for FnRouter<F>
where
    F: Fn(&Value, &mut Context, &NodeCall<'_>) -> Result<Option<String>, NodeError> + Send + Sync,
{
    async fn next(
        &self,
        output: &Value,
        context: &mut Context,
        call: NodeCall<'_>,
    ) -> Result<Option<String>, NodeError> {
        (self.0)(output, context, &call)
    }
}

/// Adapter turning a plain closure into a [`Predealer`]
pub struct FnPredealer<F>(pub F);

#[async_trait]
impl<F> Predealer for FnPredealer<F>
where
    F: Fn(&Value, &mut Context, &NodeCall<'_>) -> Result<bool, NodeError> + Send + Sync,
{
    async fn pre_deal(
        &self,
        input: &Value,
        context: &mut Context,
        call: NodeCall<'_>,
    ) -> Result<bool, NodeError> {
        (self.0)(input, context, &call)
    }
}
