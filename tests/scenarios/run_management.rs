//! Test: Run bookkeeping - ids, duplicates, removal and accessors

use crate::helpers::*;
use pipeline_runner::{EngineError, ExecutionEvent, RunStatus};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};

#[tokio::test]
async fn test_generated_run_ids_are_unique() {
    let pipeline = arithmetic_pipeline();

    let first = pipeline.start(json!(20), None, false).await.unwrap();
    let second = pipeline.start(json!(20), None, false).await.unwrap();
    assert_ne!(first.run_id, second.run_id);

    let mut expected = vec![first.run_id, second.run_id];
    expected.sort();
    assert_eq!(pipeline.run_ids().await, expected);
}

#[tokio::test]
async fn test_live_duplicate_run_id_is_rejected() {
    let pipeline = arithmetic_pipeline();

    pipeline.start(json!(20), Some("r".to_string()), true).await.unwrap();
    let err = pipeline
        .start(json!(10), Some("r".to_string()), false)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateRun(ref id) if id == "r"));

    // The paused run is untouched
    let state = pipeline.state("r").await.unwrap();
    assert_eq!(state.status, RunStatus::Paused);
    assert_eq!(state.input, json!(10));
}

#[tokio::test]
async fn test_finished_run_id_can_be_reused() {
    let pipeline = arithmetic_pipeline();

    let first = pipeline.start(json!(20), Some("r".to_string()), false).await.unwrap();
    assert_eq!(first.result(), Some(&json!(213)));

    let second = pipeline.start(json!(10), Some("r".to_string()), false).await.unwrap();
    assert_eq!(second.result(), Some(&json!(3)));
    assert_eq!(pipeline.run_ids().await, vec!["r"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_id_stays_busy_until_driver_lets_go() {
    let yaml = r#"
name: "short"
nodes:
  "1": { name: "plus one", processor: "add", processor_args: { operand: 1 } }
  "2": { name: "double", processor: "multiply", processor_args: { operand: 2 } }
"#;
    let pipeline = pipeline_from_yaml(yaml);

    // Hold the first driver in its last NodeFinished handler: the run has
    // already succeeded but the driver still owns it
    let barrier = Arc::new(Barrier::new(2));
    {
        let barrier = barrier.clone();
        let held = AtomicBool::new(false);
        pipeline
            .add_event_handler(move |event| {
                let last = matches!(event, ExecutionEvent::NodeFinished { next_node: None, .. });
                if last && !held.swap(true, Ordering::SeqCst) {
                    barrier.wait();
                    barrier.wait();
                }
            })
            .await;
    }
    let rendezvous = |barrier: &Arc<Barrier>| {
        let barrier = barrier.clone();
        tokio::task::spawn_blocking(move || {
            barrier.wait();
        })
    };

    let driver = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.start(json!(1), Some("r".to_string()), false).await })
    };
    rendezvous(&barrier).await.unwrap();
    assert_eq!(pipeline.status("r").await.unwrap(), RunStatus::Success);

    let err = pipeline
        .start(json!(10), Some("r".to_string()), false)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RunBusy(ref id) if id == "r"));
    assert!(matches!(pipeline.remove("r").await, Err(EngineError::RunBusy(_))));

    // Restoring over the owned run is refused the same way
    let other = pipeline_from_yaml(yaml);
    other.start(json!(5), Some("r".to_string()), true).await.unwrap();
    let checkpoint = other.save_checkpoint().await;
    let err = pipeline.load_checkpoint(&checkpoint).await.unwrap_err();
    assert!(matches!(err, EngineError::RunBusy(_)));

    rendezvous(&barrier).await.unwrap();
    assert_eq!(driver.await.unwrap().unwrap().result(), Some(&json!(4)));

    // Once released the id can be reused
    let second = pipeline.start(json!(10), Some("r".to_string()), false).await.unwrap();
    assert_eq!(second.result(), Some(&json!(22)));
    assert_eq!(pipeline.status("r").await.unwrap(), RunStatus::Success);
}

#[tokio::test]
async fn test_remove_forgets_run() {
    let pipeline = arithmetic_pipeline();

    pipeline.start(json!(20), Some("r".to_string()), true).await.unwrap();
    let removed = pipeline.remove("r").await.unwrap();
    assert_eq!(removed.status, RunStatus::Paused);

    assert!(matches!(pipeline.state("r").await, Err(EngineError::RunNotFound(_))));
    assert!(matches!(pipeline.remove("r").await, Err(EngineError::RunNotFound(_))));
    assert!(pipeline.run_ids().await.is_empty());
}

#[tokio::test]
async fn test_accessors_report_run_state() {
    let pipeline = arithmetic_pipeline();

    let mut context = pipeline_runner::Context::new();
    context.set("caller", json!("tests"));
    let snapshot = pipeline
        .start_with_context(json!(20), context, Some("r".to_string()), false)
        .await
        .unwrap();

    assert_eq!(pipeline.status("r").await.unwrap(), RunStatus::Success);
    assert_eq!(pipeline.output("r").await.unwrap(), Some(json!(213)));
    assert_eq!(pipeline.context("r").await.unwrap().get("caller"), Some(&json!("tests")));
    assert_eq!(pipeline.trace("r").await.unwrap().len(), 5);
    assert_eq!(pipeline.snapshot("r").await.unwrap(), snapshot);
}
