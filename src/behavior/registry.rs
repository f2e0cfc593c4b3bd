//! Name -> behavior lookup

use crate::behavior::{
    builtin, FnPredealer, FnProcessor, FnRouter, NodeCall, NodeError, Predealer, Processor, Router,
};
use crate::core::{BehaviorKind, Context, PipelineDefinition};
use crate::execution::EngineError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of the processors, routers and predealers a pipeline may name
#[derive(Clone, Default)]
pub struct NodeRegistry {
    processors: HashMap<String, Arc<dyn Processor>>,
    routers: HashMap<String, Arc<dyn Router>>,
    predealers: HashMap<String, Arc<dyn Predealer>>,
}

impl NodeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with the built-in behaviors
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_builtins(&mut registry);
        registry
    }

    pub fn register_processor(&mut self, name: impl Into<String>, processor: impl Processor + 'static) {
        self.processors.insert(name.into(), Arc::new(processor));
    }

    pub fn register_router(&mut self, name: impl Into<String>, router: impl Router + 'static) {
        self.routers.insert(name.into(), Arc::new(router));
    }

    pub fn register_predealer(&mut self, name: impl Into<String>, predealer: impl Predealer + 'static) {
        self.predealers.insert(name.into(), Arc::new(predealer));
    }

    /// Register a synchronous closure as a processor
    pub fn register_fn_processor<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Value, &mut Context, &NodeCall<'_>) -> Result<Value, NodeError> + Send + Sync + 'static,
    {
        self.register_processor(name, FnProcessor(f));
    }

    /// Register a synchronous closure as a router
    pub fn register_fn_router<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&Value, &mut Context, &NodeCall<'_>) -> Result<Option<String>, NodeError>
            + Send
            + Sync
            + 'static,
    {
        self.register_router(name, FnRouter(f));
    }

    /// Register a synchronous closure as a predealer
    pub fn register_fn_predealer<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&Value, &mut Context, &NodeCall<'_>) -> Result<bool, NodeError> + Send + Sync + 'static,
    {
        self.register_predealer(name, FnPredealer(f));
    }

    pub fn processor(&self, name: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(name).cloned()
    }

    pub fn router(&self, name: &str) -> Option<Arc<dyn Router>> {
        self.routers.get(name).cloned()
    }

    pub fn predealer(&self, name: &str) -> Option<Arc<dyn Predealer>> {
        self.predealers.get(name).cloned()
    }

    /// Registered names of one behavior kind, sorted
    pub fn names(&self, kind: BehaviorKind) -> Vec<String> {
        let mut names: Vec<String> = match kind {
            BehaviorKind::Processor => self.processors.keys().cloned().collect(),
            BehaviorKind::Router => self.routers.keys().cloned().collect(),
            BehaviorKind::Predealer => self.predealers.keys().cloned().collect(),
        };
        names.sort();
        names
    }

    pub fn contains(&self, kind: BehaviorKind, name: &str) -> bool {
        match kind {
            BehaviorKind::Processor => self.processors.contains_key(name),
            BehaviorKind::Router => self.routers.contains_key(name),
            BehaviorKind::Predealer => self.predealers.contains_key(name),
        }
    }

    /// Check that every behavior named by `definition` (nested pipelines
    /// included) is registered
    pub fn check(&self, definition: &PipelineDefinition) -> Result<(), EngineError> {
        for (kind, name) in definition.referenced_behaviors() {
            if !self.contains(kind, &name) {
                return Err(EngineError::BehaviorNotFound { kind, name });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("processors", &self.names(BehaviorKind::Processor))
            .field("routers", &self.names(BehaviorKind::Router))
            .field("predealers", &self.names(BehaviorKind::Predealer))
            .finish()
    }
}
