//! Node domain model

use crate::core::{config::NodeConfig, PipelineDefinition};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// A behavior name plus the static arguments it is called with
#[derive(Debug, Clone, PartialEq)]
pub struct BehaviorRef {
    pub name: String,
    pub args: Map<String, Value>,
}

impl BehaviorRef {
    fn from_parts(name: &Option<String>, args: &Map<String, Value>) -> Option<Self> {
        name.as_ref().filter(|n| !n.is_empty()).map(|n| BehaviorRef {
            name: n.clone(),
            args: args.clone(),
        })
    }
}

/// The three kinds of behavior a node can name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BehaviorKind {
    Processor,
    Router,
    Predealer,
}

impl std::fmt::Display for BehaviorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BehaviorKind::Processor => "processor",
            BehaviorKind::Router => "router",
            BehaviorKind::Predealer => "predealer",
        };
        f.write_str(name)
    }
}

/// What a node does once its gate is open
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Call a registered processor
    Atomic(BehaviorRef),
    /// Drive a nested pipeline to completion
    SubPipeline(Arc<PipelineDefinition>),
}

/// A single node in a pipeline
#[derive(Debug, Clone)]
pub struct Node {
    /// Unique node identifier
    pub id: String,

    /// Display label
    pub name: String,

    pub kind: NodeKind,

    pub predealer: Option<BehaviorRef>,

    pub router: Option<BehaviorRef>,

    pub exception_router: Option<BehaviorRef>,

    /// Context defaults merged before the node runs
    pub context: Map<String, Value>,

    /// Processor timeout
    pub timeout: Option<Duration>,
}

impl Node {
    /// Create a node from its config
    pub fn from_config(id: &str, config: &NodeConfig, default_timeout_secs: Option<u64>) -> Self {
        let kind = match (&config.sub_pipeline_args, config.is_sub_pipeline) {
            (Some(nested), true) => NodeKind::SubPipeline(Arc::new(nested.to_definition())),
            _ => NodeKind::Atomic(BehaviorRef {
                name: config.processor.clone().unwrap_or_default(),
                args: config.processor_args.clone(),
            }),
        };

        let name = if config.name.is_empty() {
            id.to_string()
        } else {
            config.name.clone()
        };

        Node {
            id: id.to_string(),
            name,
            kind,
            predealer: BehaviorRef::from_parts(&config.predealer, &config.predealer_args),
            router: BehaviorRef::from_parts(&config.router, &config.router_args),
            exception_router: BehaviorRef::from_parts(
                &config.exception_router,
                &config.exception_router_args,
            ),
            context: config.context.clone(),
            timeout: config
                .timeout_secs
                .or(default_timeout_secs)
                .map(Duration::from_secs),
        }
    }

    pub fn is_sub_pipeline(&self) -> bool {
        matches!(self.kind, NodeKind::SubPipeline(_))
    }

    /// Nested definition, for sub-pipeline nodes
    pub fn sub_pipeline(&self) -> Option<&Arc<PipelineDefinition>> {
        match &self.kind {
            NodeKind::SubPipeline(definition) => Some(definition),
            NodeKind::Atomic(_) => None,
        }
    }
}
