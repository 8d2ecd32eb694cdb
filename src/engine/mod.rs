//! Test-orchestration engine
//!
//! The core of the flow tester: the action model, the execution engine,
//! the hook bridge into the graph runtime, the wait scheduler, result
//! aggregation, the addon registry, and the per-run orchestrator.

pub mod action;
pub mod addon;
pub mod context;
pub mod eval;
pub mod exec;
pub mod hooks;
pub mod orchestrator;
pub mod report;
pub mod waiter;

pub use action::{Action, ActionKind, ActionMap, ActionSpec, EventCategory, GLOBAL_NODE};
pub use addon::{AddonAction, AddonContext, AddonRegistry};
pub use eval::{BasicEvaluator, CodeEvaluator, EvalScope};
pub use exec::{ActionOutcome, Engine};
pub use hooks::EngineHooks;
pub use orchestrator::{Orchestrator, RunDefaults, RunPhase};
pub use report::{CheckResult, Notification, Notifier, RunResult};
pub use waiter::{WaitOutcome, WaitScheduler};
