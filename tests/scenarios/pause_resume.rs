//! Test: Pause and resume - cooperative pauses between nodes

use crate::helpers::*;
use pipeline_runner::{EngineError, ExecutionEvent, RunStatus};
use serde_json::json;

const GATED_YAML: &str = r#"
name: "gated"
nodes:
  "1": { name: "wait", processor: "gate" }
  "2": { name: "plus one", processor: "add", processor_args: { operand: 1 } }
  "3": { name: "double", processor: "multiply", processor_args: { operand: 2 } }
"#;

fn gated_pipeline(gate: &GateProcessor) -> pipeline_runner::Pipeline {
    let mut registry = test_registry();
    registry.register_processor("gate", gate.clone());
    pipeline_with(GATED_YAML, registry)
}

#[tokio::test]
async fn test_pause_takes_effect_before_next_node() {
    let gate = GateProcessor::default();
    let pipeline = gated_pipeline(&gate);
    let mut events = collect_events(&pipeline).await;

    let driver = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.start(json!(4), Some("run".to_string()), false).await })
    };

    gate.entered.notified().await;
    pipeline.pause("run").await.unwrap();
    gate.release.notify_one();

    let snapshot = driver.await.unwrap().unwrap();
    assert_eq!(snapshot.status, RunStatus::Paused);

    let state = pipeline.state("run").await.unwrap();
    assert_eq!(state.visited_nodes(), vec!["1"]);
    assert_eq!(state.current_node_id.as_deref(), Some("2"));
    assert_eq!(state.input, json!(4));

    let paused = next_matching(&mut events, |e| matches!(e, ExecutionEvent::RunPaused { .. })).await;
    match paused {
        ExecutionEvent::RunPaused { node_id, .. } => assert_eq!(node_id.as_deref(), Some("2")),
        other => panic!("Unexpected event: {:?}", other),
    }

    // Pausing a paused run changes nothing
    pipeline.pause("run").await.unwrap();
    assert_eq!(pipeline.status("run").await.unwrap(), RunStatus::Paused);

    let snapshot = pipeline.resume("run").await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Success);
    assert_eq!(snapshot.output, Some(json!(10)));
    assert_eq!(
        pipeline.state("run").await.unwrap().visited_nodes(),
        vec!["1", "2", "3"]
    );
}

#[tokio::test]
async fn test_resume_requires_paused_run() {
    let pipeline = arithmetic_pipeline();

    let snapshot = pipeline.start(json!(20), None, false).await.unwrap();
    let err = pipeline.resume(&snapshot.run_id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidState { status: RunStatus::Success, operation: "resume", .. }
    ));

    let err = pipeline.pause(&snapshot.run_id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { operation: "pause", .. }));

    let err = pipeline.resume("missing").await.unwrap_err();
    assert!(matches!(err, EngineError::RunNotFound(_)));
}

#[tokio::test]
async fn test_resume_while_driving_is_busy() {
    let gate = GateProcessor::default();
    let pipeline = gated_pipeline(&gate);

    let driver = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.start(json!(1), Some("busy".to_string()), false).await })
    };
    gate.entered.notified().await;

    // Running, not paused
    let err = pipeline.resume("busy").await.unwrap_err();
    assert!(matches!(err, EngineError::RunBusy(_)));
    let err = pipeline.remove("busy").await.unwrap_err();
    assert!(matches!(err, EngineError::RunBusy(_)));

    gate.release.notify_one();
    let snapshot = driver.await.unwrap().unwrap();
    assert_eq!(snapshot.output, Some(json!(4)));
}

#[tokio::test]
async fn test_single_step_can_be_switched_off() {
    let pipeline = arithmetic_pipeline();

    let snapshot = pipeline.start(json!(20), Some("r".to_string()), true).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Paused);
    assert_eq!(
        pipeline.state("r").await.unwrap().current_node_id.as_deref(),
        Some("3")
    );

    pipeline.set_single_step("r", false).await.unwrap();
    let snapshot = pipeline.resume("r").await.unwrap();
    assert_eq!(snapshot.result(), Some(&json!(213)));
}
