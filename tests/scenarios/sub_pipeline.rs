//! Test: Sub-pipelines - nested runs as node processors

use crate::helpers::*;
use pipeline_runner::{ExecutionEvent, RunStatus, TraceStatus};
use serde_json::json;

const NESTED_YAML: &str = r#"
name: "outer"
nodes:
  "1": { name: "plus one", processor: "add", processor_args: { operand: 1 } }
  "2":
    name: "inner"
    is_sub_pipeline: true
    sub_pipeline_args:
      name: "inner"
      nodes:
        "1": { name: "double", processor: "multiply", processor_args: { operand: 2 } }
        "2": { name: "plus ten", processor: "add", processor_args: { operand: 10 } }
  "3": { name: "minus three", processor: "subtract", processor_args: { operand: 3 } }
"#;

#[tokio::test]
async fn test_nested_output_becomes_node_output() {
    let pipeline = pipeline_from_yaml(NESTED_YAML);

    let snapshot = pipeline.start(json!(4), None, false).await.unwrap();
    let state = pipeline.state(&snapshot.run_id).await.unwrap();

    // ((4 + 1) * 2 + 10) - 3
    assert_success(&state, &json!(17));
    assert_eq!(state.visited_nodes(), vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_nested_events_reach_outer_handlers() {
    let pipeline = pipeline_from_yaml(NESTED_YAML);
    let mut events = collect_events(&pipeline).await;

    let snapshot = pipeline.start(json!(4), Some("r".to_string()), false).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Success);

    let nested = next_matching(&mut events, |e| {
        matches!(e, ExecutionEvent::NodeFinished { pipeline, .. } if pipeline == "inner")
    })
    .await;
    assert_eq!(nested.run_id(), "r/2");
}

#[tokio::test]
async fn test_nested_failure_fails_outer_node() {
    let yaml = r#"
name: "outer"
nodes:
  "1":
    name: "inner"
    is_sub_pipeline: true
    sub_pipeline_args:
      name: "inner"
      nodes:
        "1": { name: "divide", processor: "divide", processor_args: { dividend: 1 } }
    exception_router: "goto"
    exception_router_args: { target: 3 }
  "2": { name: "never", processor: "identity" }
  "3": { name: "fallback", processor: "add", processor_args: { operand: 5 } }
"#;
    let pipeline = pipeline_from_yaml(yaml);

    let snapshot = pipeline.start(json!(0), None, false).await.unwrap();
    let state = pipeline.state(&snapshot.run_id).await.unwrap();

    assert_success(&state, &json!(5));
    assert_eq!(state.trace[0].status, TraceStatus::Failed);
    assert_eq!(
        state.trace[0].message,
        "Sub-pipeline failed at node 1: division by zero"
    );
}

#[tokio::test]
async fn test_pause_propagates_into_nested_run() {
    let gate = GateProcessor::default();
    let mut registry = test_registry();
    registry.register_processor("gate", gate.clone());
    let pipeline = pipeline_with(
        r#"
name: "outer"
nodes:
  "1":
    name: "inner"
    is_sub_pipeline: true
    sub_pipeline_args:
      name: "inner"
      nodes:
        "1": { name: "wait", processor: "gate" }
        "2": { name: "double", processor: "multiply", processor_args: { operand: 2 } }
  "2": { name: "plus one", processor: "add", processor_args: { operand: 1 } }
"#,
        registry,
    );

    let driver = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.start(json!(3), Some("r".to_string()), false).await })
    };
    gate.entered.notified().await;
    pipeline.pause("r").await.unwrap();
    gate.release.notify_one();

    // The nested run stops before its node 2; the outer run stays on node 1
    let snapshot = driver.await.unwrap().unwrap();
    assert_eq!(snapshot.status, RunStatus::Paused);
    let state = pipeline.state("r").await.unwrap();
    assert_eq!(state.current_node_id.as_deref(), Some("1"));
    assert!(state.trace.is_empty());

    let snapshot = pipeline.resume("r").await.unwrap();
    assert_eq!(snapshot.result(), Some(&json!(7)));
    assert_eq!(
        pipeline.state("r").await.unwrap().visited_nodes(),
        vec!["1", "2"]
    );
}

#[tokio::test]
async fn test_deferred_step_inside_nested_run() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "outer"
nodes:
  "1":
    name: "inner"
    is_sub_pipeline: true
    sub_pipeline_args:
      name: "inner"
      nodes:
        "1": { name: "remote add", processor: "deferred", processor_args: { add: 10, delay_ms: 20 } }
  "2": { name: "double", processor: "multiply", processor_args: { operand: 2 } }
"#,
    );

    let snapshot = pipeline.start(json!(1), Some("r".to_string()), false).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Running);
    assert!(pipeline.state("r").await.unwrap().awaiting_completion);

    // The nested completion resumes the outer run
    let state = wait_terminal(&pipeline, "r").await;
    assert_success(&state, &json!(22));
}

#[tokio::test]
async fn test_nested_runs_are_per_outer_run() {
    let pipeline = pipeline_from_yaml(NESTED_YAML);

    let a = pipeline.start(json!(0), Some("a".to_string()), true).await.unwrap();
    let b = pipeline.start(json!(10), Some("b".to_string()), true).await.unwrap();
    assert_eq!(a.status, RunStatus::Paused);
    assert_eq!(b.status, RunStatus::Paused);

    pipeline.set_single_step("a", false).await.unwrap();
    pipeline.set_single_step("b", false).await.unwrap();
    let b = pipeline.resume("b").await.unwrap();
    let a = pipeline.resume("a").await.unwrap();

    assert_eq!(a.result(), Some(&json!(9)));
    assert_eq!(b.result(), Some(&json!(29)));
}
