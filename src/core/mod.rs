//! Core domain models for Pipeline
//!
//! This module defines the fundamental data structures that represent
//! pipeline definitions, nodes, and the state of individual runs.

pub mod config;
pub mod context;
pub mod node;
pub mod pipeline;
pub mod state;

pub use context::*;
pub use node::*;
pub use pipeline::*;
pub use state::*;
