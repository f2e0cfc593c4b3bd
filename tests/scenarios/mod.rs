//! Scenario-based tests for pipeline-runner

mod arithmetic;
mod pause_resume;
mod routing;
mod run_management;
mod sub_pipeline;
