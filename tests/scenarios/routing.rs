//! Test: Routing - default successors, routers, predealers, exception
//! routers and processor timeouts

use crate::helpers::*;
use pipeline_runner::{BehaviorKind, EngineError, RunStatus, TraceStatus};
use serde_json::json;

#[tokio::test]
async fn test_default_successor_follows_numeric_ids() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "linear"
nodes:
  "1": { name: "one", processor: "add", processor_args: { operand: 1 } }
  "2": { name: "two", processor: "add", processor_args: { operand: 2 } }
  "3": { name: "three", processor: "add", processor_args: { operand: 3 } }
  "5": { name: "island", processor: "add", processor_args: { operand: 500 } }
"#,
    );

    let snapshot = pipeline.start(json!(0), None, false).await.unwrap();
    let state = pipeline.state(&snapshot.run_id).await.unwrap();

    // No node 4, so the run ends after node 3
    assert_success(&state, &json!(6));
    assert_eq!(state.visited_nodes(), vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_branch_router_reads_context() {
    let yaml = r#"
name: "branching"
nodes:
  "1":
    name: "configure"
    processor: "identity"
    router: "branch"
    router_args: { context_key: "mode", equals: "fast", then: 3, else: 2 }
  "2": { name: "slow path", processor: "multiply", processor_args: { operand: 10 }, router: "end" }
  "3": { name: "fast path", processor: "add", processor_args: { operand: 1 }, router: "end" }
"#;
    let pipeline = pipeline_from_yaml(yaml);

    let mut fast = pipeline_runner::Context::new();
    fast.set("mode", json!("fast"));
    let snapshot = pipeline
        .start_with_context(json!(5), fast, None, false)
        .await
        .unwrap();
    assert_eq!(snapshot.result(), Some(&json!(6)));

    let snapshot = pipeline.start(json!(5), None, false).await.unwrap();
    assert_eq!(snapshot.result(), Some(&json!(50)));
}

#[tokio::test]
async fn test_node_context_defaults_are_merged() {
    let yaml = r#"
name: "context"
nodes:
  "1":
    name: "seed"
    processor: "set_context"
    processor_args: { greeting: "hello" }
    context: { retries: 3 }
  "2":
    name: "read back"
    processor: "from_context"
    processor_args: { key: "greeting" }
"#;
    let pipeline = pipeline_from_yaml(yaml);

    let snapshot = pipeline.start(json!(null), None, false).await.unwrap();
    let state = pipeline.state(&snapshot.run_id).await.unwrap();

    assert_success(&state, &json!("hello"));
    assert_eq!(state.context.get("retries"), Some(&json!(3)));
    assert_eq!(state.context.get("greeting"), Some(&json!("hello")));
}

#[tokio::test]
async fn test_predealer_skips_processor() {
    let yaml = r#"
name: "gated"
nodes:
  "1":
    name: "gated add"
    predealer: "context_flag"
    predealer_args: { key: "enabled" }
    processor: "add"
    processor_args: { operand: 100 }
  "2": { name: "double", processor: "multiply", processor_args: { operand: 2 } }
"#;
    let pipeline = pipeline_from_yaml(yaml);

    let snapshot = pipeline.start(json!(1), None, false).await.unwrap();
    let state = pipeline.state(&snapshot.run_id).await.unwrap();
    assert_success(&state, &json!(2));
    assert_eq!(state.trace[0].status, TraceStatus::Skipped);
    assert_eq!(state.trace[1].status, TraceStatus::Success);

    let mut enabled = pipeline_runner::Context::new();
    enabled.set("enabled", json!(true));
    let snapshot = pipeline
        .start_with_context(json!(1), enabled, None, false)
        .await
        .unwrap();
    assert_eq!(snapshot.result(), Some(&json!(202)));
}

#[tokio::test]
async fn test_failure_without_exception_router_ends_run() {
    let yaml = r#"
name: "failing"
nodes:
  "1": { name: "ok", processor: "identity" }
  "2": { name: "broken", processor: "fail", processor_args: { message: "disk on fire" } }
  "3": { name: "never", processor: "identity" }
"#;
    let pipeline = pipeline_from_yaml(yaml);

    let snapshot = pipeline.start(json!(1), None, false).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Exception);
    assert!(snapshot.output.is_none());

    let state = pipeline.state(&snapshot.run_id).await.unwrap();
    assert_exception(&state, "disk on fire");
    assert_eq!(state.visited_nodes(), vec!["1", "2"]);
}

#[tokio::test]
async fn test_exception_router_returning_none_ends_run() {
    let yaml = r#"
name: "give up"
nodes:
  "1":
    name: "broken"
    processor: "fail"
    exception_router: "end"
  "2": { name: "never", processor: "identity" }
"#;
    let pipeline = pipeline_from_yaml(yaml);

    let snapshot = pipeline.start(json!(1), None, false).await.unwrap();
    let state = pipeline.state(&snapshot.run_id).await.unwrap();
    assert_exception(&state, "boom");
    assert_eq!(state.visited_nodes(), vec!["1"]);
}

#[tokio::test]
async fn test_exception_router_sees_error_value() {
    let yaml = r#"
name: "inspect"
nodes:
  "1":
    name: "broken"
    processor: "fail"
    processor_args: { message: "quota exceeded" }
    exception_router: "match"
    exception_router_args: { pattern: "quota", then: 3, else: 2 }
  "2": { name: "generic", processor: "add", processor_args: { operand: 1 } }
  "3": { name: "quota", processor: "add", processor_args: { operand: 100 } }
"#;
    let pipeline = pipeline_from_yaml(yaml);

    let snapshot = pipeline.start(json!(1), None, false).await.unwrap();
    let state = pipeline.state(&snapshot.run_id).await.unwrap();
    assert_success(&state, &json!(101));
    assert_eq!(state.visited_nodes(), vec!["1", "3"]);
}

#[tokio::test]
async fn test_router_error_ends_run() {
    let yaml = r#"
name: "bad router"
nodes:
  "1":
    name: "one"
    processor: "identity"
    router: "goto"
  "2": { name: "two", processor: "identity" }
"#;
    let pipeline = pipeline_from_yaml(yaml);

    let snapshot = pipeline.start(json!(1), None, false).await.unwrap();
    let state = pipeline.state(&snapshot.run_id).await.unwrap();
    assert_exception(&state, "Router 'goto' failed");
}

#[tokio::test]
async fn test_route_to_unknown_node_is_an_error() {
    let yaml = r#"
name: "dangling"
nodes:
  "1":
    name: "one"
    processor: "identity"
    router: "goto"
    router_args: { target: 42 }
"#;
    let pipeline = pipeline_from_yaml(yaml);

    let err = pipeline
        .start(json!(1), Some("dangling-run".to_string()), false)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NodeNotFound { ref node_id, .. } if node_id == "42"));

    let state = pipeline.state("dangling-run").await.unwrap();
    assert_exception(&state, "42");
}

#[tokio::test]
async fn test_unknown_behavior_is_rejected_at_build() {
    let config = config_from_yaml(
        r#"
name: "typo"
nodes:
  "1": { name: "one", processor: "idenity" }
"#,
    );
    let err = pipeline_runner::Pipeline::from_config(
        &config,
        std::sync::Arc::new(pipeline_runner::NodeRegistry::with_builtins()),
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::BehaviorNotFound { kind: BehaviorKind::Processor, .. }));
}

#[tokio::test]
async fn test_processor_timeout_fails_node() {
    let yaml = r#"
name: "slow"
nodes:
  "1":
    name: "too slow"
    processor: "sleep"
    processor_args: { ms: 5000 }
    timeout_secs: 1
    exception_router: "goto"
    exception_router_args: { target: 2 }
  "2": { name: "fallback", processor: "add", processor_args: { operand: 1 } }
"#;
    let pipeline = pipeline_from_yaml(yaml);

    let snapshot = pipeline.start(json!(1), None, false).await.unwrap();
    let state = pipeline.state(&snapshot.run_id).await.unwrap();

    assert_success(&state, &json!(2));
    assert_eq!(state.trace[0].status, TraceStatus::Failed);
    assert!(state.trace[0].message.contains("Timeout"));
}
