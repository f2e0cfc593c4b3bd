//! Test: Arithmetic chain - explicit jumps, default successors and
//! exception routing on the six-node pipeline

use crate::helpers::*;
use pipeline_runner::{RunStatus, TraceStatus};
use serde_json::json;

#[tokio::test]
async fn test_arithmetic_happy_path() {
    let pipeline = arithmetic_pipeline();

    let snapshot = pipeline.start(json!(20), None, false).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Success);
    assert_eq!(snapshot.result(), Some(&json!(213)));

    let state = pipeline.state(&snapshot.run_id).await.unwrap();
    assert_success(&state, &json!(213));

    // Node 2 is jumped over by the explicit route from node 1
    assert_eq!(state.visited_nodes(), vec!["1", "3", "4", "5", "6"]);
    assert!(state.trace.iter().all(|entry| entry.status == TraceStatus::Success));
}

#[tokio::test]
async fn test_arithmetic_division_by_zero_is_routed() {
    let pipeline = arithmetic_pipeline();

    let snapshot = pipeline.start(json!(10), None, false).await.unwrap();
    let state = pipeline.state(&snapshot.run_id).await.unwrap();

    assert_success(&state, &json!(3));
    assert_eq!(state.visited_nodes(), vec!["1", "3", "5", "6"]);

    let divide = &state.trace[1];
    assert_eq!(divide.node_id, "3");
    assert_eq!(divide.status, TraceStatus::Failed);
    assert!(divide.message.contains("division by zero"));
}

#[tokio::test]
async fn test_arithmetic_is_deterministic() {
    let pipeline = arithmetic_pipeline();

    for input in [20, 10, 35, 60] {
        let first = pipeline.start(json!(input), None, false).await.unwrap();
        let second = pipeline.start(json!(input), None, false).await.unwrap();

        let first = pipeline.state(&first.run_id).await.unwrap();
        let second = pipeline.state(&second.run_id).await.unwrap();
        assert_eq!(first.output, second.output);
        assert_eq!(first.visited_nodes(), second.visited_nodes());
    }
}

#[tokio::test]
async fn test_single_step_matches_full_run() {
    let pipeline = arithmetic_pipeline();

    let full = pipeline.start(json!(20), Some("full".to_string()), false).await.unwrap();

    let mut snapshot = pipeline.start(json!(20), Some("stepped".to_string()), true).await.unwrap();
    let mut pauses = 0;
    while snapshot.status == RunStatus::Paused {
        pauses += 1;
        snapshot = pipeline.resume("stepped").await.unwrap();
    }

    // One pause between each pair of the five executed nodes
    assert_eq!(pauses, 4);
    assert_eq!(snapshot.status, RunStatus::Success);
    assert_eq!(snapshot.output, full.output);

    let full = pipeline.state("full").await.unwrap();
    let stepped = pipeline.state("stepped").await.unwrap();
    assert_eq!(full.visited_nodes(), stepped.visited_nodes());
    assert_eq!(full.context, stepped.context);
}

#[tokio::test]
async fn test_non_numeric_input_fails_run() {
    let pipeline = arithmetic_pipeline();

    let snapshot = pipeline.start(json!("twenty"), None, false).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Exception);
    assert!(snapshot.result().is_none());

    let state = pipeline.state(&snapshot.run_id).await.unwrap();
    assert_exception(&state, "Expected a number");
    assert_eq!(state.visited_nodes(), vec!["1"]);
}
