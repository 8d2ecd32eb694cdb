//! Daemon process hosting the graph runtime and test engine
//!
//! The daemon owns the long-lived state: the loaded flow graph, the
//! configured test suites, and the orchestrator driving runs. The CLI
//! talks to it over IPC.

pub mod handler;
pub mod server;

use std::sync::Arc;

use crate::common::{config::Config, Result};
use crate::engine::{Engine, Orchestrator, RunDefaults};
use crate::graph::sim::SimGraph;
use crate::suite::{self, TestSuite};

/// Long-lived daemon state shared by every client connection
pub struct TestHost {
    pub graph: Arc<SimGraph>,
    pub orchestrator: Orchestrator,
    pub suites: Vec<TestSuite>,
}

impl TestHost {
    /// Build the host from configuration: load flows and suites, wire the
    /// engine to the graph
    pub fn from_config(config: &Config) -> Result<Self> {
        let graph = Arc::new(SimGraph::new());

        if let Some(flows) = &config.graph.flows {
            let count = graph.load_flows(flows)?;
            tracing::info!(count, path = %flows.display(), "Loaded flow nodes");
        } else {
            tracing::warn!("No flows file configured; graph starts empty");
        }

        let suites = match &config.graph.suites {
            Some(path) => {
                let suites = suite::load_suites(path)?;
                tracing::info!(count = suites.len(), path = %path.display(), "Loaded test suites");
                suites
            }
            None => Vec::new(),
        };

        let engine = Engine::new(graph.clone());
        let defaults = RunDefaults {
            timeout_ms: config.defaults.timeout_ms,
            max_actions: config.defaults.max_actions,
        };
        let orchestrator = Orchestrator::with_defaults(engine, defaults);

        Ok(Self {
            graph,
            orchestrator,
            suites,
        })
    }
}

/// Run the daemon until shutdown or idle timeout
pub async fn run() -> Result<()> {
    let mut daemon = server::Daemon::new().await?;
    daemon.run().await
}
