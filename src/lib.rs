//! Flow tester - scripted test orchestration for message-passing flow graphs
//!
//! This library drives a flow graph through scripted test cases: it
//! intercepts node traffic with lifecycle hooks, executes registered
//! actions, validates payloads, and aggregates check outcomes into a run
//! result.

pub mod cli;
pub mod commands;
pub mod common;
pub mod daemon;
pub mod engine;
pub mod graph;
pub mod ipc;
pub mod suite;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use engine::{Engine, Orchestrator, RunResult};
pub use ipc::protocol::Command;
