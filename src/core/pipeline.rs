//! Pipeline definition - the immutable node graph

use crate::core::{
    config::PipelineConfig,
    node::{BehaviorKind, Node, NodeKind},
};
use std::collections::BTreeMap;

/// An immutable pipeline definition, built once from configuration
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    /// Pipeline name
    pub name: String,

    /// Whether runs are driven on background tasks
    pub asynchronous: bool,

    /// First node of every run
    pub entry: String,

    nodes: BTreeMap<String, Node>,
}

impl PipelineDefinition {
    /// Create a definition from configuration
    pub fn from_config(config: &PipelineConfig) -> Self {
        let nodes = config
            .nodes
            .iter()
            .map(|(id, node_config)| {
                (
                    id.clone(),
                    Node::from_config(id, node_config, config.default_timeout_secs),
                )
            })
            .collect();

        PipelineDefinition {
            name: config.name.clone(),
            asynchronous: config.asynchronous,
            entry: config.entry_node().unwrap_or_default(),
            nodes,
        }
    }

    /// Get a node by ID
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Sorted node ids; used as the graph fingerprint of checkpoints
    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    /// Next node when no router is configured: the textual id one greater
    /// than the numeric value of `id`, if such a node exists
    pub fn default_successor(&self, id: &str) -> Option<String> {
        let next = id.trim().parse::<i64>().ok()?.checked_add(1)?.to_string();
        self.nodes.contains_key(&next).then_some(next)
    }

    /// Every behavior name referenced by this definition and its nested
    /// definitions, as `(kind, name)` pairs
    pub fn referenced_behaviors(&self) -> Vec<(BehaviorKind, String)> {
        let mut refs = Vec::new();
        for node in self.nodes.values() {
            if let Some(predealer) = &node.predealer {
                refs.push((BehaviorKind::Predealer, predealer.name.clone()));
            }
            match &node.kind {
                NodeKind::Atomic(processor) => refs.push((BehaviorKind::Processor, processor.name.clone())),
                NodeKind::SubPipeline(nested) => refs.extend(nested.referenced_behaviors()),
            }
            if let Some(router) = &node.router {
                refs.push((BehaviorKind::Router, router.name.clone()));
            }
            if let Some(router) = &node.exception_router {
                refs.push((BehaviorKind::Router, router.name.clone()));
            }
        }
        refs
    }
}
