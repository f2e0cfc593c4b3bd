//! Pipeline engine - drives runs through the node graph
//!
//! A [`Pipeline`] owns one immutable [`PipelineDefinition`] and any number of
//! runs keyed by run id. Each run is advanced by at most one driver at a
//! time; the registry lock is never held while a behavior executes.

use crate::{
    behavior::{NodeCall, NodeError, NodeRegistry, Output},
    core::{
        config::PipelineConfig, BehaviorKind, BehaviorRef, Context, Node, NodeKind, PipelineDefinition,
        RunSnapshot, RunState, RunStatus, TraceEntry, TraceStatus,
    },
    execution::{
        subpipeline::{self, SubPipelineAdapter},
        EngineError, EventHandler, ExecutionEvent,
    },
};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Boxed future used where engine calls recurse through nested pipelines
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Who drives a run between two suspension points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// `start`/`resume`/`complete` return once the run stops
    Synchronous,
    /// Runs advance on spawned tokio tasks; calls return immediately
    Asynchronous,
}

/// How a node attempt ended once its behaviors returned
#[derive(Debug, Clone)]
pub(crate) enum NodeOutcome {
    Output(Value),
    /// Predealer closed the gate; the input passes through
    Skipped(Value),
    Failed(NodeError),
}

/// Result delivered to a run suspended on an asynchronous step
#[derive(Debug, Clone)]
pub(crate) enum Completion {
    Finished(NodeOutcome),
    /// A nested run paused; the outer run pauses on the same node
    Paused,
}

pub(crate) enum Attempt {
    Done(NodeOutcome),
    Deferred,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Caller,
    Completion,
}

struct RunEntry {
    state: RunState,
    /// A driver currently owns the run
    driving: bool,
    pause_requested: bool,
    /// The step in flight announced that it will report `Deferred`
    deferring: bool,
    /// Completion that arrived before the step reported `Deferred`
    early: Option<Completion>,
}

impl RunEntry {
    fn new(state: RunState, driving: bool) -> Self {
        Self {
            state,
            driving,
            pause_requested: false,
            deferring: false,
            early: None,
        }
    }
}

/// A run id can be reused once its run is finished and its driver has let go
fn replaceable(runs: &HashMap<String, RunEntry>, run_id: &str) -> Result<(), EngineError> {
    match runs.get(run_id) {
        Some(existing) if existing.driving => Err(EngineError::RunBusy(run_id.to_string())),
        Some(existing) if existing.state.status.is_live() => {
            Err(EngineError::DuplicateRun(run_id.to_string()))
        }
        _ => Ok(()),
    }
}

struct ParentLink {
    pipeline: Weak<PipelineInner>,
    run_id: String,
    node_id: String,
}

struct PipelineInner {
    definition: Arc<PipelineDefinition>,
    registry: Arc<NodeRegistry>,
    mode: ExecutionMode,
    handlers: Arc<RwLock<Vec<EventHandler>>>,
    runs: Mutex<HashMap<String, RunEntry>>,
    sub_pipelines: HashMap<String, SubPipelineAdapter>,
    parent: Option<ParentLink>,
    settled: watch::Sender<u64>,
}

/// Executable pipeline: a definition, its behaviors and the runs driven on it
///
/// Cloning is cheap and yields another handle on the same engine.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.inner.definition.name)
            .field("mode", &self.inner.mode)
            .finish()
    }
}

impl Pipeline {
    /// Build a pipeline, using the mode requested by the definition
    pub fn new(definition: PipelineDefinition, registry: Arc<NodeRegistry>) -> Result<Self, EngineError> {
        let mode = if definition.asynchronous {
            ExecutionMode::Asynchronous
        } else {
            ExecutionMode::Synchronous
        };
        Self::with_mode(definition, registry, mode)
    }

    /// Build a pipeline with an explicit execution mode
    pub fn with_mode(
        definition: PipelineDefinition,
        registry: Arc<NodeRegistry>,
        mode: ExecutionMode,
    ) -> Result<Self, EngineError> {
        Self::build(
            Arc::new(definition),
            registry,
            mode,
            Arc::new(RwLock::new(Vec::new())),
            None,
        )
    }

    /// Validate a configuration and build a pipeline from it
    pub fn from_config(config: &PipelineConfig, registry: Arc<NodeRegistry>) -> Result<Self, EngineError> {
        config.validate()?;
        Self::new(config.to_definition(), registry)
    }

    fn build(
        definition: Arc<PipelineDefinition>,
        registry: Arc<NodeRegistry>,
        mode: ExecutionMode,
        handlers: Arc<RwLock<Vec<EventHandler>>>,
        parent: Option<ParentLink>,
    ) -> Result<Self, EngineError> {
        registry.check(&definition)?;
        if !definition.contains(&definition.entry) {
            return Err(EngineError::NodeNotFound {
                pipeline: definition.name.clone(),
                node_id: definition.entry.clone(),
            });
        }

        let sub_pipelines = definition
            .nodes()
            .filter_map(|node| {
                node.sub_pipeline()
                    .map(|nested| (node.id.clone(), SubPipelineAdapter::new(&node.id, nested.clone())))
            })
            .collect();

        let (settled, _) = watch::channel(0);

        Ok(Self {
            inner: Arc::new(PipelineInner {
                definition,
                registry,
                mode,
                handlers,
                runs: Mutex::new(HashMap::new()),
                sub_pipelines,
                parent,
                settled,
            }),
        })
    }

    /// Engine for one nested run of a sub-pipeline node
    ///
    /// Nested engines are always synchronous, share the registry and the
    /// event handlers, and report back to `run_id` on this engine.
    pub(crate) fn nested(
        &self,
        definition: Arc<PipelineDefinition>,
        run_id: &str,
        node_id: &str,
    ) -> Result<Pipeline, EngineError> {
        Self::build(
            definition,
            self.inner.registry.clone(),
            ExecutionMode::Synchronous,
            self.inner.handlers.clone(),
            Some(ParentLink {
                pipeline: Arc::downgrade(&self.inner),
                run_id: run_id.to_string(),
                node_id: node_id.to_string(),
            }),
        )
    }

    pub fn name(&self) -> &str {
        &self.inner.definition.name
    }

    pub fn mode(&self) -> ExecutionMode {
        self.inner.mode
    }

    pub fn definition(&self) -> &Arc<PipelineDefinition> {
        &self.inner.definition
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.inner.registry
    }

    pub(crate) fn sub_pipelines(&self) -> &HashMap<String, SubPipelineAdapter> {
        &self.inner.sub_pipelines
    }

    /// Add an event handler; nested pipelines report through the same handlers
    pub async fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.inner.handlers.write().await.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    async fn emit(&self, event: ExecutionEvent) {
        let handlers = self.inner.handlers.read().await;
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Start a new run at the entry node
    ///
    /// Without a `run_id` a fresh UUID is used. A finished run with the same
    /// id is replaced; a live one is rejected with `DuplicateRun`, and one
    /// whose driver has not yet let go with `RunBusy`.
    pub async fn start(
        &self,
        input: Value,
        run_id: Option<String>,
        single_step: bool,
    ) -> Result<RunSnapshot, EngineError> {
        self.start_with_context(input, Context::new(), run_id, single_step)
            .await
    }

    /// Start a new run whose context is seeded with `context`
    pub async fn start_with_context(
        &self,
        input: Value,
        context: Context,
        run_id: Option<String>,
        single_step: bool,
    ) -> Result<RunSnapshot, EngineError> {
        let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        {
            let mut runs = self.inner.runs.lock().await;
            replaceable(&runs, &run_id)?;
            let mut state = RunState::new(run_id.clone(), &self.inner.definition.entry, input, single_step);
            state.context = context;
            runs.insert(run_id.clone(), RunEntry::new(state, true));
        }

        for adapter in self.inner.sub_pipelines.values() {
            adapter.forget(&run_id).await;
        }

        info!("Starting run {} of pipeline '{}'", run_id, self.name());
        self.emit(ExecutionEvent::RunStarted {
            pipeline: self.name().to_string(),
            run_id: run_id.clone(),
        })
        .await;

        self.dispatch(run_id, Origin::Caller, None).await
    }

    /// Continue a paused run from the node it stopped before
    pub async fn resume(&self, run_id: &str) -> Result<RunSnapshot, EngineError> {
        {
            let mut runs = self.inner.runs.lock().await;
            let entry = runs
                .get_mut(run_id)
                .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
            if entry.driving {
                return Err(EngineError::RunBusy(run_id.to_string()));
            }
            if entry.state.status != RunStatus::Paused {
                return Err(EngineError::InvalidState {
                    run_id: run_id.to_string(),
                    status: entry.state.status,
                    operation: "resume",
                });
            }
            entry.state.status = RunStatus::Running;
            entry.pause_requested = false;
            entry.driving = true;
        }

        info!("Resuming run {} of pipeline '{}'", run_id, self.name());
        self.dispatch(run_id.to_string(), Origin::Caller, None).await
    }

    /// Ask a running run to stop before its next node
    ///
    /// The node in flight is allowed to finish. Pausing an already paused run
    /// is a no-op. The request is forwarded to nested runs of this run.
    pub fn pause<'a>(&'a self, run_id: &'a str) -> BoxFuture<'a, Result<(), EngineError>> {
        Box::pin(async move {
            {
                let mut runs = self.inner.runs.lock().await;
                let entry = runs
                    .get_mut(run_id)
                    .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
                match entry.state.status {
                    RunStatus::Paused => return Ok(()),
                    RunStatus::Running => entry.pause_requested = true,
                    status => {
                        return Err(EngineError::InvalidState {
                            run_id: run_id.to_string(),
                            status,
                            operation: "pause",
                        })
                    }
                }
            }
            debug!("Pause requested for run {}", run_id);

            for adapter in self.inner.sub_pipelines.values() {
                if let Some(nested) = adapter.cached(run_id).await {
                    if let Err(e) = nested.pipeline.pause(&nested.run_id).await {
                        debug!("Nested run {} not paused: {}", nested.run_id, e);
                    }
                }
            }
            Ok(())
        })
    }

    /// Deliver the result of a processor that returned [`Output::Deferred`]
    ///
    /// The suspended step finishes with `result` and the run continues.
    pub async fn complete(
        &self,
        run_id: &str,
        result: Result<Value, NodeError>,
    ) -> Result<RunSnapshot, EngineError> {
        let outcome = match result {
            Ok(value) => NodeOutcome::Output(value),
            Err(err) => NodeOutcome::Failed(err),
        };
        self.deliver(run_id, Completion::Finished(outcome)).await
    }

    /// Completion reported by the nested run of sub-pipeline node `node_id`
    pub(crate) async fn deliver_nested(
        &self,
        run_id: &str,
        node_id: &str,
        completion: Completion,
    ) -> Result<RunSnapshot, EngineError> {
        if let Completion::Finished(_) = completion {
            if let Some(adapter) = self.inner.sub_pipelines.get(node_id) {
                adapter.forget(run_id).await;
            }
        }
        self.deliver(run_id, completion).await
    }

    async fn deliver(&self, run_id: &str, completion: Completion) -> Result<RunSnapshot, EngineError> {
        enum Delivery {
            Stashed(RunSnapshot),
            Paused(RunSnapshot, Option<String>),
            Drive(NodeOutcome),
        }

        let delivery = {
            let mut runs = self.inner.runs.lock().await;
            let entry = runs
                .get_mut(run_id)
                .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
            if entry.state.status != RunStatus::Running {
                return Err(EngineError::InvalidState {
                    run_id: run_id.to_string(),
                    status: entry.state.status,
                    operation: "complete",
                });
            }

            if entry.driving {
                // Only a step that announced its deferral may be completed early
                if !entry.deferring || entry.early.is_some() {
                    return Err(EngineError::NotAwaitingCompletion(run_id.to_string()));
                }
                entry.early = Some(completion);
                Delivery::Stashed(entry.state.snapshot())
            } else if !entry.state.awaiting_completion {
                return Err(EngineError::NotAwaitingCompletion(run_id.to_string()));
            } else {
                entry.state.awaiting_completion = false;
                match completion {
                    Completion::Paused => {
                        entry.state.status = RunStatus::Paused;
                        entry.pause_requested = false;
                        Delivery::Paused(entry.state.snapshot(), entry.state.current_node_id.clone())
                    }
                    Completion::Finished(outcome) => {
                        entry.driving = true;
                        Delivery::Drive(outcome)
                    }
                }
            }
        };

        match delivery {
            Delivery::Stashed(snapshot) => Ok(snapshot),
            Delivery::Paused(snapshot, node_id) => {
                info!("Run {} paused on node {:?}", run_id, node_id);
                self.inner.settled.send_modify(|n| *n += 1);
                self.emit(ExecutionEvent::RunPaused {
                    pipeline: self.name().to_string(),
                    run_id: run_id.to_string(),
                    node_id,
                })
                .await;
                Ok(snapshot)
            }
            Delivery::Drive(outcome) => {
                debug!("Completion delivered to run {}", run_id);
                self.dispatch(run_id.to_string(), Origin::Completion, Some(outcome)).await
            }
        }
    }

    /// Mark the step in flight as one that will report `Deferred`
    ///
    /// From here on a completion may arrive before the step returns; it is
    /// held until then. See [`NodeCall::defer`].
    pub(crate) async fn expect_completion(&self, run_id: &str) {
        let mut runs = self.inner.runs.lock().await;
        match runs.get_mut(run_id) {
            Some(entry) if entry.driving => entry.deferring = true,
            _ => debug!("Run {} is not being driven; deferral not recorded", run_id),
        }
    }

    /// Toggle pausing after every node
    pub async fn set_single_step(&self, run_id: &str, enabled: bool) -> Result<(), EngineError> {
        let mut runs = self.inner.runs.lock().await;
        let entry = runs
            .get_mut(run_id)
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
        entry.state.single_step = enabled;
        Ok(())
    }

    /// Forget a run that no driver currently owns
    pub async fn remove(&self, run_id: &str) -> Result<RunState, EngineError> {
        let state = {
            let mut runs = self.inner.runs.lock().await;
            match runs.get(run_id) {
                None => return Err(EngineError::RunNotFound(run_id.to_string())),
                Some(entry) if entry.driving => return Err(EngineError::RunBusy(run_id.to_string())),
                Some(_) => {}
            }
            runs.remove(run_id)
                .map(|entry| entry.state)
                .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?
        };

        for adapter in self.inner.sub_pipelines.values() {
            adapter.forget(run_id).await;
        }
        Ok(state)
    }

    /// Wait until no driver owns the run and it is finished, paused or
    /// suspended on an asynchronous step
    pub async fn wait(&self, run_id: &str) -> Result<RunSnapshot, EngineError> {
        let mut settled = self.inner.settled.subscribe();
        loop {
            {
                let runs = self.inner.runs.lock().await;
                let entry = runs
                    .get(run_id)
                    .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
                let advancing = entry.driving
                    || (entry.state.status == RunStatus::Running && !entry.state.awaiting_completion);
                if !advancing {
                    return Ok(entry.state.snapshot());
                }
            }
            if settled.changed().await.is_err() {
                return self.snapshot(run_id).await;
            }
        }
    }

    async fn with_run<T>(&self, run_id: &str, f: impl FnOnce(&RunState) -> T) -> Result<T, EngineError> {
        let runs = self.inner.runs.lock().await;
        runs.get(run_id)
            .map(|entry| f(&entry.state))
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))
    }

    /// Full copy of a run's state
    pub async fn state(&self, run_id: &str) -> Result<RunState, EngineError> {
        self.with_run(run_id, RunState::clone).await
    }

    pub async fn status(&self, run_id: &str) -> Result<RunStatus, EngineError> {
        self.with_run(run_id, |state| state.status).await
    }

    /// Last node output; the final result once the run succeeded
    pub async fn output(&self, run_id: &str) -> Result<Option<Value>, EngineError> {
        self.with_run(run_id, |state| state.output.clone()).await
    }

    pub async fn context(&self, run_id: &str) -> Result<Context, EngineError> {
        self.with_run(run_id, |state| state.context.clone()).await
    }

    pub async fn trace(&self, run_id: &str) -> Result<Vec<TraceEntry>, EngineError> {
        self.with_run(run_id, |state| state.trace.clone()).await
    }

    pub async fn snapshot(&self, run_id: &str) -> Result<RunSnapshot, EngineError> {
        self.with_run(run_id, RunState::snapshot).await
    }

    /// Ids of every run known to this pipeline, sorted
    pub async fn run_ids(&self) -> Vec<String> {
        let runs = self.inner.runs.lock().await;
        let mut ids: Vec<String> = runs.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Copies of every running or paused run, sorted by run id
    pub(crate) async fn live_runs(&self) -> Vec<RunState> {
        let runs = self.inner.runs.lock().await;
        let mut states: Vec<RunState> = runs
            .values()
            .filter(|entry| entry.state.status.is_live())
            .map(|entry| entry.state.clone())
            .collect();
        states.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        states
    }

    /// Whether a new run may take `run_id` on this pipeline
    pub(crate) async fn check_replaceable(&self, run_id: &str) -> Result<(), EngineError> {
        let runs = self.inner.runs.lock().await;
        replaceable(&runs, run_id)
    }

    /// Register a run restored from a checkpoint; live runs come back paused
    pub(crate) async fn restore_run(&self, mut state: RunState) -> Result<(), EngineError> {
        let mut runs = self.inner.runs.lock().await;
        replaceable(&runs, &state.run_id)?;
        if state.status == RunStatus::Running {
            state.status = RunStatus::Paused;
        }
        state.awaiting_completion = false;
        runs.insert(state.run_id.clone(), RunEntry::new(state, false));
        Ok(())
    }

    async fn dispatch(
        &self,
        run_id: String,
        origin: Origin,
        pending: Option<NodeOutcome>,
    ) -> Result<RunSnapshot, EngineError> {
        match self.inner.mode {
            ExecutionMode::Synchronous => self.drive(&run_id, origin, pending).await,
            ExecutionMode::Asynchronous => {
                let snapshot = self.snapshot(&run_id).await?;
                let engine = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = engine.drive(&run_id, origin, pending).await {
                        error!("Run {} stopped on an engine error: {}", run_id, e);
                    }
                });
                Ok(snapshot)
            }
        }
    }

    /// Advance a claimed run until it stops, then release it
    fn drive<'a>(
        &'a self,
        run_id: &'a str,
        origin: Origin,
        pending: Option<NodeOutcome>,
    ) -> BoxFuture<'a, Result<RunSnapshot, EngineError>> {
        Box::pin(async move {
            let mut result = match pending {
                Some(outcome) => self.finish_deferred(run_id, outcome).await,
                None => Ok(Flow::Continue),
            };
            while let Ok(Flow::Continue) = result {
                result = self.step(run_id).await;
            }

            let state = self.release(run_id).await?;
            self.after_settle(&state, origin).await;
            result.map(|_| state.snapshot())
        })
    }

    async fn release(&self, run_id: &str) -> Result<RunState, EngineError> {
        let state = {
            let mut runs = self.inner.runs.lock().await;
            let entry = runs
                .get_mut(run_id)
                .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
            entry.driving = false;
            entry.state.clone()
        };
        self.inner.settled.send_modify(|n| *n += 1);
        Ok(state)
    }

    async fn after_settle(&self, state: &RunState, origin: Origin) {
        if state.status.is_terminal() {
            info!(
                "Run {} of pipeline '{}' finished: {}",
                state.run_id,
                self.name(),
                state.status
            );
            if self.inner.mode == ExecutionMode::Asynchronous {
                self.emit(ExecutionEvent::RunCompleted {
                    pipeline: self.name().to_string(),
                    run_id: state.run_id.clone(),
                    status: state.status,
                    context: state.context.clone(),
                    output: state.output.clone(),
                })
                .await;
            }
        }

        // A nested run finishing outside its parent's drive reports back
        if origin != Origin::Completion {
            return;
        }
        let Some(link) = &self.inner.parent else {
            return;
        };
        let Some(completion) = subpipeline::completion_for(state) else {
            return;
        };
        let Some(inner) = link.pipeline.upgrade() else {
            return;
        };

        let parent = Pipeline { inner };
        if let Err(e) = parent.deliver_nested(&link.run_id, &link.node_id, completion).await {
            warn!(
                "Could not report nested run {} to run {}: {}",
                state.run_id, link.run_id, e
            );
        }
    }

    fn node_not_found(&self, node_id: &str) -> EngineError {
        EngineError::NodeNotFound {
            pipeline: self.name().to_string(),
            node_id: node_id.to_string(),
        }
    }

    /// End the run with `Exception` because of an engine error
    async fn abort(&self, run_id: &str, err: EngineError) -> EngineError {
        error!("Run {} aborted: {}", run_id, err);
        let mut runs = self.inner.runs.lock().await;
        if let Some(entry) = runs.get_mut(run_id) {
            entry.state.fail();
        }
        err
    }

    fn call<'a>(&'a self, run_id: &'a str, node: &'a Node, behavior: &'a BehaviorRef) -> NodeCall<'a> {
        NodeCall {
            engine: self,
            run_id,
            node_id: &node.id,
            args: &behavior.args,
        }
    }

    /// Execute the current node of a run
    async fn step(&self, run_id: &str) -> Result<Flow, EngineError> {
        let (node_id, input, mut context) = {
            let mut runs = self.inner.runs.lock().await;
            let entry = runs
                .get_mut(run_id)
                .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
            entry.deferring = false;
            entry.early = None;
            match entry.state.current_node_id.clone() {
                Some(node_id) => (node_id, entry.state.input.clone(), entry.state.context.clone()),
                None => {
                    entry.state.succeed();
                    return Ok(Flow::Stop);
                }
            }
        };

        let Some(node) = self.inner.definition.node(&node_id) else {
            let err = self.node_not_found(&node_id);
            return Err(self.abort(run_id, err).await);
        };

        context.merge(&node.context);
        debug!("Run {} executing node {} ({})", run_id, node.id, node.name);
        self.emit(ExecutionEvent::NodeStarted {
            pipeline: self.name().to_string(),
            run_id: run_id.to_string(),
            node_id: node.id.clone(),
            node_name: node.name.clone(),
        })
        .await;

        let attempt = match self.attempt(run_id, node, input, &mut context).await {
            Ok(attempt) => attempt,
            Err(err) => return Err(self.abort(run_id, err).await),
        };

        match attempt {
            Attempt::Done(outcome) => {
                self.discard_early(run_id, node).await;
                self.finish_step(run_id, node, context, outcome).await
            }
            Attempt::Deferred => self.suspend(run_id, node, context).await,
            Attempt::Paused => {
                self.park(run_id, context).await?;
                Ok(Flow::Stop)
            }
        }
    }

    /// Run the predealer and the processor (or nested pipeline) of a node
    async fn attempt(
        &self,
        run_id: &str,
        node: &Node,
        input: Value,
        context: &mut Context,
    ) -> Result<Attempt, EngineError> {
        let registry = &self.inner.registry;

        if let Some(gate) = &node.predealer {
            let predealer = registry.predealer(&gate.name).ok_or_else(|| EngineError::BehaviorNotFound {
                kind: BehaviorKind::Predealer,
                name: gate.name.clone(),
            })?;
            match predealer.pre_deal(&input, context, self.call(run_id, node, gate)).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Node {} skipped by predealer '{}'", node.id, gate.name);
                    return Ok(Attempt::Done(NodeOutcome::Skipped(input)));
                }
                Err(err) => return Ok(Attempt::Done(NodeOutcome::Failed(err))),
            }
        }

        match &node.kind {
            NodeKind::Atomic(behavior) => {
                let processor = registry.processor(&behavior.name).ok_or_else(|| EngineError::BehaviorNotFound {
                    kind: BehaviorKind::Processor,
                    name: behavior.name.clone(),
                })?;
                let call = self.call(run_id, node, behavior);

                let result = match node.timeout {
                    Some(limit) => tokio::time::timeout(limit, processor.execute(input, context, call))
                        .await
                        .unwrap_or_else(|_| Err(NodeError::timed_out(limit))),
                    None => processor.execute(input, context, call).await,
                };

                Ok(match result {
                    Ok(Output::Value(value)) => Attempt::Done(NodeOutcome::Output(value)),
                    Ok(Output::Deferred) => Attempt::Deferred,
                    Err(err) => Attempt::Done(NodeOutcome::Failed(err)),
                })
            }
            NodeKind::SubPipeline(_) => {
                let adapter = self
                    .inner
                    .sub_pipelines
                    .get(&node.id)
                    .ok_or_else(|| self.node_not_found(&node.id))?;
                adapter.execute(self, run_id, input).await
            }
        }
    }

    /// Park a run whose processor deferred its result
    async fn suspend(&self, run_id: &str, node: &Node, context: Context) -> Result<Flow, EngineError> {
        let early = {
            let mut runs = self.inner.runs.lock().await;
            let entry = runs
                .get_mut(run_id)
                .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
            entry.state.context = context.clone();
            entry.deferring = false;
            let early = entry.early.take();
            if early.is_none() {
                entry.state.awaiting_completion = true;
            }
            early
        };

        match early {
            None => {
                info!("Run {} waiting for node {} to complete", run_id, node.id);
                Ok(Flow::Stop)
            }
            Some(Completion::Finished(outcome)) => self.finish_step(run_id, node, context, outcome).await,
            Some(Completion::Paused) => {
                self.park(run_id, context).await?;
                Ok(Flow::Stop)
            }
        }
    }

    /// Drop a completion held for a step that returned a value after all
    async fn discard_early(&self, run_id: &str, node: &Node) {
        let mut runs = self.inner.runs.lock().await;
        if let Some(entry) = runs.get_mut(run_id) {
            entry.deferring = false;
            if entry.early.take().is_some() {
                warn!(
                    "Run {}: node {} announced a deferred result but returned a value; the early completion is discarded",
                    run_id, node.id
                );
            }
        }
    }

    /// Pause a run on its current node without recording a trace entry
    async fn park(&self, run_id: &str, context: Context) -> Result<(), EngineError> {
        let node_id = {
            let mut runs = self.inner.runs.lock().await;
            let entry = runs
                .get_mut(run_id)
                .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
            entry.state.context = context;
            entry.state.status = RunStatus::Paused;
            entry.state.awaiting_completion = false;
            entry.pause_requested = false;
            entry.deferring = false;
            entry.early = None;
            entry.state.current_node_id.clone()
        };

        info!("Run {} paused on node {:?}", run_id, node_id);
        self.emit(ExecutionEvent::RunPaused {
            pipeline: self.name().to_string(),
            run_id: run_id.to_string(),
            node_id,
        })
        .await;
        Ok(())
    }

    /// Finish the step a run was suspended on
    async fn finish_deferred(&self, run_id: &str, outcome: NodeOutcome) -> Result<Flow, EngineError> {
        let (node_id, context) = {
            let runs = self.inner.runs.lock().await;
            let entry = runs
                .get(run_id)
                .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
            (entry.state.current_node_id.clone(), entry.state.context.clone())
        };

        let node = node_id.as_deref().and_then(|id| self.inner.definition.node(id));
        match node {
            Some(node) => self.finish_step(run_id, node, context, outcome).await,
            None => {
                let err = self.node_not_found(node_id.as_deref().unwrap_or_default());
                Err(self.abort(run_id, err).await)
            }
        }
    }

    /// Route after a node attempt and publish the result
    async fn finish_step(
        &self,
        run_id: &str,
        node: &Node,
        mut context: Context,
        outcome: NodeOutcome,
    ) -> Result<Flow, EngineError> {
        let (status, value) = match outcome {
            NodeOutcome::Output(value) => (TraceStatus::Success, value),
            NodeOutcome::Skipped(value) => (TraceStatus::Skipped, value),
            NodeOutcome::Failed(err) => return self.recover(run_id, node, context, err).await,
        };

        let next = match &node.router {
            Some(behavior) => {
                let Some(router) = self.inner.registry.router(&behavior.name) else {
                    let err = EngineError::BehaviorNotFound {
                        kind: BehaviorKind::Router,
                        name: behavior.name.clone(),
                    };
                    return Err(self.abort(run_id, err).await);
                };
                router
                    .next(&value, &mut context, self.call(run_id, node, behavior))
                    .await
                    .map_err(|e| format!("Router '{}' failed: {}", behavior.name, e))
            }
            None => Ok(self.inner.definition.default_successor(&node.id)),
        };

        match next {
            Ok(next) => {
                self.advance_to(run_id, node, context, status, String::new(), Some(value), next)
                    .await
            }
            Err(message) => {
                warn!("Run {} stopped at node {}: {}", run_id, node.id, message);
                self.commit_failure(run_id, node, context, message).await
            }
        }
    }

    /// Handle a node failure through its exception router, if any
    async fn recover(
        &self,
        run_id: &str,
        node: &Node,
        mut context: Context,
        err: NodeError,
    ) -> Result<Flow, EngineError> {
        warn!("Node {} failed in run {}: {}", node.id, run_id, err);

        let Some(behavior) = &node.exception_router else {
            return self.commit_failure(run_id, node, context, err.message).await;
        };
        let Some(router) = self.inner.registry.router(&behavior.name) else {
            let err = EngineError::BehaviorNotFound {
                kind: BehaviorKind::Router,
                name: behavior.name.clone(),
            };
            return Err(self.abort(run_id, err).await);
        };

        match router
            .next(&err.to_value(&node.id), &mut context, self.call(run_id, node, behavior))
            .await
        {
            Ok(Some(next)) => {
                debug!("Exception router sends run {} from {} to {}", run_id, node.id, next);
                self.advance_to(run_id, node, context, TraceStatus::Failed, err.message, None, Some(next))
                    .await
            }
            Ok(None) => self.commit_failure(run_id, node, context, err.message).await,
            Err(router_err) => {
                let message = format!(
                    "{}; exception router '{}' failed: {}",
                    err, behavior.name, router_err
                );
                self.commit_failure(run_id, node, context, message).await
            }
        }
    }

    /// Record the attempt and move the run to `next` (or finish it)
    #[allow(clippy::too_many_arguments)]
    async fn advance_to(
        &self,
        run_id: &str,
        node: &Node,
        context: Context,
        status: TraceStatus,
        message: String,
        output: Option<Value>,
        next: Option<String>,
    ) -> Result<Flow, EngineError> {
        if let Some(next_id) = &next {
            if !self.inner.definition.contains(next_id) {
                let err = self.node_not_found(next_id);
                error!("Run {}: node {} routed to unknown node {}", run_id, node.id, next_id);
                self.commit_failure(run_id, node, context, err.to_string()).await?;
                return Err(err);
            }
        }

        let (flow, paused) = {
            let mut runs = self.inner.runs.lock().await;
            let entry = runs
                .get_mut(run_id)
                .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
            let state = &mut entry.state;
            state.context = context;
            state.trace.push(TraceEntry::new(&node.id, &node.name, status, message.clone()));
            if let Some(value) = output {
                state.input = value.clone();
                state.output = Some(value);
            }

            match &next {
                Some(next_id) => {
                    state.current_node_id = Some(next_id.clone());
                    if entry.pause_requested || state.single_step {
                        state.status = RunStatus::Paused;
                        entry.pause_requested = false;
                        (Flow::Stop, true)
                    } else {
                        (Flow::Continue, false)
                    }
                }
                None => {
                    state.succeed();
                    (Flow::Stop, false)
                }
            }
        };

        self.emit(ExecutionEvent::NodeFinished {
            pipeline: self.name().to_string(),
            run_id: run_id.to_string(),
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            status,
            message,
            next_node: next.clone(),
        })
        .await;

        if paused {
            info!("Run {} paused before node {:?}", run_id, next);
            self.emit(ExecutionEvent::RunPaused {
                pipeline: self.name().to_string(),
                run_id: run_id.to_string(),
                node_id: next,
            })
            .await;
        }

        Ok(flow)
    }

    /// Record a failed attempt and end the run with `Exception`
    async fn commit_failure(
        &self,
        run_id: &str,
        node: &Node,
        context: Context,
        message: String,
    ) -> Result<Flow, EngineError> {
        {
            let mut runs = self.inner.runs.lock().await;
            let entry = runs
                .get_mut(run_id)
                .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
            entry.state.context = context;
            entry
                .state
                .trace
                .push(TraceEntry::new(&node.id, &node.name, TraceStatus::Failed, message.clone()));
            entry.state.fail();
        }

        self.emit(ExecutionEvent::NodeFinished {
            pipeline: self.name().to_string(),
            run_id: run_id.to_string(),
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            status: TraceStatus::Failed,
            message,
            next_node: None,
        })
        .await;

        Ok(Flow::Stop)
    }
}
