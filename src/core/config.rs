//! Pipeline configuration from YAML or JSON

use crate::core::PipelineDefinition;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Drive runs on background tasks instead of the caller's task
    #[serde(default, alias = "is_asyn")]
    pub asynchronous: bool,

    /// Entry node (defaults to the lowest numeric id)
    #[serde(default)]
    pub start: Option<String>,

    /// Processor timeout applied to nodes without their own
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,

    /// Node id -> node configuration
    pub nodes: BTreeMap<String, NodeConfig>,
}

/// Node configuration as defined in YAML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Human-readable node name
    #[serde(default)]
    pub name: String,

    /// Gate behavior deciding whether the processor runs
    #[serde(default)]
    pub predealer: Option<String>,

    #[serde(default, alias = "predealer_execute_para")]
    pub predealer_args: Map<String, Value>,

    /// Processor behavior (ignored for sub-pipeline nodes)
    #[serde(default)]
    pub processor: Option<String>,

    #[serde(default, alias = "processor_para")]
    pub processor_args: Map<String, Value>,

    /// Defaults merged into the run context when this node executes
    #[serde(default)]
    pub context: Map<String, Value>,

    /// Behavior choosing the next node
    #[serde(default)]
    pub router: Option<String>,

    #[serde(default, alias = "router_para")]
    pub router_args: Map<String, Value>,

    /// Behavior choosing a recovery node when the processor fails
    #[serde(default)]
    pub exception_router: Option<String>,

    #[serde(default, alias = "exception_router_para")]
    pub exception_router_args: Map<String, Value>,

    /// Delegate to a nested pipeline instead of a processor
    #[serde(default)]
    pub is_sub_pipeline: bool,

    #[serde(default, alias = "sub_pipeline_para")]
    pub sub_pipeline_args: Option<Box<PipelineConfig>>,

    /// Processor timeout (overrides the pipeline default)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl NodeConfig {
    /// Shorthand for a plain processor node
    pub fn processor(name: &str, processor: &str) -> Self {
        Self {
            name: name.to_string(),
            processor: Some(processor.to_string()),
            ..Default::default()
        }
    }
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML (or JSON) file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse pipeline configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    ///
    /// Behavior names are checked later, against a registry, when the
    /// pipeline is built.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            anyhow::bail!("Pipeline '{}' has no nodes", self.name);
        }

        if let Some(start) = &self.start {
            if !self.nodes.contains_key(start) {
                anyhow::bail!(
                    "Pipeline '{}' starts at non-existent node '{}'",
                    self.name,
                    start
                );
            }
        }

        for (id, node) in &self.nodes {
            if node.is_sub_pipeline {
                match &node.sub_pipeline_args {
                    Some(nested) => nested.validate().map_err(|e| {
                        anyhow::anyhow!("Sub-pipeline node '{}' is invalid: {}", id, e)
                    })?,
                    None => anyhow::bail!(
                        "Node '{}' is a sub-pipeline but has no sub_pipeline_args",
                        id
                    ),
                }
            } else if node.processor.as_deref().map_or(true, str::is_empty) {
                anyhow::bail!("Node '{}' has no processor", id);
            }
        }

        Ok(())
    }

    /// Resolve the entry node: explicit `start`, else the lowest numeric id,
    /// else the first id in lexical order
    pub fn entry_node(&self) -> Option<String> {
        if let Some(start) = &self.start {
            return Some(start.clone());
        }

        let lowest_numeric = self
            .nodes
            .keys()
            .filter_map(|id| id.parse::<i64>().ok().map(|n| (n, id)))
            .min_by_key(|(n, _)| *n)
            .map(|(_, id)| id.clone());

        lowest_numeric.or_else(|| self.nodes.keys().next().cloned())
    }

    /// Convert config to the immutable pipeline definition
    pub fn to_definition(&self) -> PipelineDefinition {
        PipelineDefinition::from_config(self)
    }
}
