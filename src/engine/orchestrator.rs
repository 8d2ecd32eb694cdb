//! Test orchestrator
//!
//! Sequences a full test-case run: init → register → setup → wait →
//! cleanup → report. Errors after registration are caught at this
//! boundary; cleanup still runs and the next init fully resets state.

use std::fmt;
use std::sync::Mutex;
use std::sync::Arc;

use crate::common::{Error, Result};
use crate::suite::{TestCase, TestSuite, DEFAULT_MAX_ACTIONS, DEFAULT_TIMEOUT_MS};

use super::action::{ActionSpec, EventCategory};
use super::exec::Engine;
use super::hooks::EngineHooks;
use super::report::{Notification, RunResult};

/// Run lifecycle phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Initialized,
    Registered,
    SetupRunning,
    Waiting,
    CleanupRunning,
    Reported,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Initialized => write!(f, "initialized"),
            Self::Registered => write!(f, "registered"),
            Self::SetupRunning => write!(f, "setup"),
            Self::Waiting => write!(f, "waiting"),
            Self::CleanupRunning => write!(f, "cleanup"),
            Self::Reported => write!(f, "reported"),
        }
    }
}

/// Fallbacks applied when a test case leaves settings unset
#[derive(Debug, Clone, Copy)]
pub struct RunDefaults {
    pub timeout_ms: u64,
    pub max_actions: usize,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_actions: DEFAULT_MAX_ACTIONS,
        }
    }
}

/// Drives one run at a time against an engine
pub struct Orchestrator {
    engine: Arc<Engine>,
    defaults: RunDefaults,
    phase: Mutex<RunPhase>,
}

impl Orchestrator {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self::with_defaults(engine, RunDefaults::default())
    }

    pub fn with_defaults(engine: Arc<Engine>, defaults: RunDefaults) -> Self {
        Self {
            engine,
            defaults,
            phase: Mutex::new(RunPhase::Idle),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.lock().unwrap()
    }

    fn set_phase(&self, phase: RunPhase) {
        tracing::debug!(%phase, "Run phase");
        *self.phase.lock().unwrap() = phase;
    }

    /// Clear all engine state and (re)install the three hooks
    pub async fn init(&self) {
        self.engine.reset(self.defaults.max_actions).await;
        self.engine
            .graph()
            .install_hooks(EngineHooks::new(&self.engine));
        self.set_phase(RunPhase::Initialized);
    }

    /// Register one event category's actions-by-node
    pub async fn register_event(
        &self,
        event: &str,
        actions_by_node: &[(String, Vec<ActionSpec>)],
        suite_id: &str,
        test_id: &str,
    ) -> Result<usize> {
        let event: EventCategory = event.parse()?;
        let count = self
            .engine
            .register(event, actions_by_node, suite_id, test_id)
            .await?;
        self.set_phase(RunPhase::Registered);
        Ok(count)
    }

    /// Run the setup groups with an optional ceiling override
    pub async fn run_setup(&self, max_actions: Option<usize>) -> Result<()> {
        if let Some(max) = max_actions {
            self.engine.set_max_actions(max).await;
        }
        self.engine.finalize_registration().await;
        self.set_phase(RunPhase::SetupRunning);
        self.addons_on_start().await;
        self.engine.run_groups(EventCategory::Setup).await
    }

    /// Run the cleanup groups, notify addons, and tear down the hooks
    pub async fn run_cleanup(&self) -> Result<()> {
        self.set_phase(RunPhase::CleanupRunning);
        let result = self.engine.run_groups(EventCategory::Cleanup).await;
        self.addons_on_end().await;
        self.engine.graph().remove_hooks();
        result
    }

    /// Execute one full orchestrated test-case run
    pub async fn run_test_case(&self, suite: &TestSuite, test: &TestCase) -> Result<RunResult> {
        tracing::info!(suite = %suite.id, test = %test.id, "Running test case");

        self.init().await;
        if let Some(max) = test.max_actions {
            self.engine.set_max_actions(max).await;
        }

        // Registration errors reject the run outright
        if let Err(e) = self.register_case(suite, test).await {
            self.engine.graph().remove_hooks();
            self.set_phase(RunPhase::Idle);
            return Err(e);
        }
        self.engine.finalize_registration().await;
        self.set_phase(RunPhase::Registered);

        // Everything from setup onward is caught at this boundary so
        // cleanup always runs and the result is always produced
        let run_outcome = self.run_body(test).await;

        if let Err(e) = self.run_cleanup().await {
            tracing::warn!(error = %e, "Cleanup actions aborted");
        }

        let result = self.engine.snapshot_result().await;
        self.notify_finished(suite, test, &result);
        self.set_phase(RunPhase::Reported);

        if let Err(e) = run_outcome {
            tracing::warn!(suite = %suite.id, test = %test.id, error = %e, "Run-level failure");
        }
        Ok(result)
    }

    async fn register_case(&self, suite: &TestSuite, test: &TestCase) -> Result<()> {
        for (event, nodes) in &test.actions {
            let event: EventCategory = event.parse()?;
            let actions_by_node: Vec<(String, Vec<ActionSpec>)> = nodes
                .iter()
                .map(|(node, specs)| (node.clone(), specs.clone()))
                .collect();
            self.engine
                .register(event, &actions_by_node, &suite.id, &test.id)
                .await?;
        }
        Ok(())
    }

    async fn run_body(&self, test: &TestCase) -> Result<()> {
        self.set_phase(RunPhase::SetupRunning);
        self.addons_on_start().await;
        self.engine.run_groups(EventCategory::Setup).await?;

        self.set_phase(RunPhase::Waiting);
        // Arm the wait slot before re-checking completion: a check landing
        // in between is buffered and resolves the wait immediately
        let armed = self.engine.waiter().arm();
        if self.engine.checks_complete().await || self.engine.is_aborted().await {
            self.engine.waiter().complete();
            drop(armed);
        } else {
            let timeout = test.timeout_ms.unwrap_or(self.defaults.timeout_ms);
            let outcome = self.engine.waiter().wait_armed(armed, timeout).await;
            tracing::debug!(?outcome, "Wait resolved");
        }

        if self.engine.is_aborted().await {
            return Err(Error::run_failed("waiting", "action limit exceeded"));
        }
        Ok(())
    }

    async fn addons_on_start(&self) {
        let names = self.engine.engaged_addon_names().await;
        for addon in self.engine.addons().engaged(&names) {
            if let Err(e) = addon.on_test_start().await {
                tracing::warn!(addon = addon.name(), error = %e, "Addon on_test_start failed");
            }
        }
    }

    async fn addons_on_end(&self) {
        let names = self.engine.engaged_addon_names().await;
        for addon in self.engine.addons().engaged(&names) {
            if let Err(e) = addon.on_test_end().await {
                tracing::warn!(addon = addon.name(), error = %e, "Addon on_test_end failed");
            }
        }
    }

    fn notify_finished(&self, suite: &TestSuite, test: &TestCase, result: &RunResult) {
        self.engine.notifier().publish(Notification::RunFinished {
            suite_id: suite.id.clone(),
            test_id: test.id.clone(),
            all: result.all(),
            success: result.success_count(),
            fail: result.fail_count(),
            aborted: result.aborted,
        });
    }
}
