//! Action execution engine
//!
//! Executes one action at a time against the shared per-run state,
//! dispatching built-in kinds directly and unknown kinds through the
//! addon registry, and enforcing the global action ceiling. Actions in a
//! list run strictly sequentially; a failed action is logged (and counted
//! as a failed check when check-performing) without aborting the rest of
//! its list. Only the ceiling overflow is fatal.

use serde_json::Value;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

use crate::common::{Error, Result};
use crate::graph::{GraphRuntime, Message};

use super::action::{Action, ActionKind, ActionMap, ActionSpec, EventCategory, SetSource, SetTarget};
use super::addon::{AddonContext, AddonRegistry};
use super::context::{resolve_key, ContextStore};
use super::eval::{BasicEvaluator, CodeEvaluator, EvalScope};
use super::report::{CheckLedger, CheckResult, Notification, Notifier, RecordOutcome, RunResult};
use super::waiter::WaitScheduler;

/// Shared mutable state for one run, fully reset between runs
#[derive(Default)]
pub struct RunState {
    pub map: ActionMap,
    /// Next index to stamp during registration
    next_index: usize,
    /// Monotonic count of dispatched actions
    dispatched: usize,
    max_actions: usize,
    ledger: CheckLedger,
    context: ContextStore,
    /// Addon kind names seen during registration, in first-seen order
    addon_names: Vec<String>,
    aborted: bool,
}

/// How a dispatch is held against the global action ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Counted, and refused once the ceiling has tripped
    Counted,
    /// Cleanup teardown: runs even after an overflow, uncounted
    Exempt,
}

/// What one dispatched action produced
#[derive(Debug, Default)]
pub struct ActionOutcome {
    /// Check outcome, when the action's contract yields one
    pub check: Option<bool>,
    /// Evaluation result (meaningful for `function` actions)
    pub value: Value,
}

/// The action execution engine
pub struct Engine {
    graph: Arc<dyn GraphRuntime>,
    addons: AddonRegistry,
    waiter: WaitScheduler,
    notifier: Notifier,
    evaluator: Arc<dyn CodeEvaluator>,
    state: Mutex<RunState>,
}

impl Engine {
    pub fn new(graph: Arc<dyn GraphRuntime>) -> Arc<Self> {
        Self::with_evaluator(graph, Arc::new(BasicEvaluator))
    }

    pub fn with_evaluator(
        graph: Arc<dyn GraphRuntime>,
        evaluator: Arc<dyn CodeEvaluator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            graph,
            addons: AddonRegistry::new(),
            waiter: WaitScheduler::new(),
            notifier: Notifier::new(),
            evaluator,
            state: Mutex::new(RunState::default()),
        })
    }

    pub fn graph(&self) -> &Arc<dyn GraphRuntime> {
        &self.graph
    }

    pub fn addons(&self) -> &AddonRegistry {
        &self.addons
    }

    pub fn waiter(&self) -> &WaitScheduler {
        &self.waiter
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    // === Run state management ===

    /// Clear all per-run state and set the action ceiling
    pub async fn reset(&self, max_actions: usize) {
        let mut state = self.state.lock().await;
        *state = RunState {
            max_actions,
            ..RunState::default()
        };
    }

    /// Replace the action ceiling for the current run
    pub async fn set_max_actions(&self, max_actions: usize) {
        self.state.lock().await.max_actions = max_actions;
    }

    /// Register one event category's actions-by-node, stamping run
    /// metadata; indices are assigned sequentially across the whole
    /// registration batch starting at 0
    pub async fn register(
        &self,
        event: EventCategory,
        actions_by_node: &[(String, Vec<ActionSpec>)],
        suite_id: &str,
        test_id: &str,
    ) -> Result<usize> {
        // Parse everything first so a malformed spec rejects the command
        // without a half-registered map
        let mut parsed = Vec::new();
        for (node, specs) in actions_by_node {
            for spec in specs {
                let (kind, perform_check) = spec.parse_kind()?;
                parsed.push((node.clone(), kind, perform_check));
            }
        }

        let mut state = self.state.lock().await;
        let count = parsed.len();
        for (node, kind, perform_check) in parsed {
            if let ActionKind::Addon { name, .. } = &kind {
                if !state.addon_names.contains(name) {
                    state.addon_names.push(name.clone());
                }
            }
            let action = Action {
                index: state.next_index,
                suite_id: suite_id.to_string(),
                test_id: test_id.to_string(),
                perform_check,
                kind,
            };
            state.next_index += 1;
            state.map.register(event, &node, action);
        }
        tracing::debug!(%event, count, "Registered actions");
        Ok(count)
    }

    /// Compute the expected-check total from the registered map; call
    /// once after registration, before setup
    pub async fn finalize_registration(&self) {
        let mut state = self.state.lock().await;
        let expected = state.map.expected_checks();
        state.ledger.reset(expected);
        tracing::debug!(expected, "Expected checks computed");
    }

    /// Addon kind names engaged by the current registration batch
    pub async fn engaged_addon_names(&self) -> Vec<String> {
        self.state.lock().await.addon_names.clone()
    }

    pub async fn expected_checks(&self) -> usize {
        self.state.lock().await.ledger.expected()
    }

    pub async fn checks_complete(&self) -> bool {
        self.state.lock().await.ledger.is_complete()
    }

    pub async fn is_aborted(&self) -> bool {
        self.state.lock().await.aborted
    }

    /// Snapshot the tallies into the run's result document
    pub async fn snapshot_result(&self) -> RunResult {
        let state = self.state.lock().await;
        state.ledger.snapshot(state.aborted)
    }

    /// Read a context value (diagnostics and tests)
    pub async fn context_get(&self, global: bool, key: &str) -> Option<Value> {
        let state = self.state.lock().await;
        if global {
            state.context.get_global(key).cloned()
        } else {
            state.context.get_flow(None, key).cloned()
        }
    }

    // === Action execution ===

    /// Run the registered list for one event/node, if any
    pub async fn run_event(&self, event: EventCategory, node: &str, msg: Option<&Message>) {
        let actions = {
            let state = self.state.lock().await;
            state.map.lookup(event, node).map(<[Action]>::to_vec)
        };
        let Some(actions) = actions else { return };

        tracing::debug!(%event, node, count = actions.len(), "Hook actions triggered");
        if let Err(e) = self.run_list(&actions, Some(node), msg).await {
            tracing::warn!(%event, node, error = %e, "Action list aborted");
        }
    }

    /// Whether the registered map holds a list for one event/node
    pub async fn has_event(&self, event: EventCategory, node: &str) -> bool {
        let state = self.state.lock().await;
        state.map.lookup(event, node).is_some()
    }

    /// Run all groups for an event: global group first, then node groups
    /// in map order. Used for the setup and cleanup phases.
    ///
    /// Cleanup lists are exempt from the action ceiling so teardown still
    /// runs after an overflow aborts the rest of the test.
    pub async fn run_groups(&self, event: EventCategory) -> Result<()> {
        let admission = if event == EventCategory::Cleanup {
            Admission::Exempt
        } else {
            Admission::Counted
        };
        let groups = {
            let state = self.state.lock().await;
            state.map.groups_for(event)
        };
        for (node, actions) in groups {
            let node_arg = if node == super::action::GLOBAL_NODE {
                None
            } else {
                Some(node.as_str())
            };
            self.run_list_with(&actions, node_arg, None, admission).await?;
        }
        Ok(())
    }

    /// Execute one ordered action list; sequential, failure-isolated
    pub async fn run_list(
        &self,
        actions: &[Action],
        node: Option<&str>,
        msg: Option<&Message>,
    ) -> Result<()> {
        self.run_list_with(actions, node, msg, Admission::Counted).await
    }

    async fn run_list_with(
        &self,
        actions: &[Action],
        node: Option<&str>,
        msg: Option<&Message>,
        admission: Admission,
    ) -> Result<()> {
        // Actions in the list share one working copy of the message so a
        // `set` is visible to the `match` after it
        let mut msg = msg.cloned();

        for action in actions {
            self.admit(action, admission).await?;

            match self.dispatch(action, node, msg.as_mut()).await {
                Ok(outcome) => {
                    if action.perform_check {
                        if let Some(ok) = outcome.check {
                            self.report_check(ok, action).await;
                        }
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        kind = action.kind.tag(),
                        index = action.index,
                        error = %e,
                        "Action failed"
                    );
                    if action.perform_check {
                        self.report_check(false, action).await;
                    }
                }
            }
        }
        Ok(())
    }

    /// Run one ad hoc action outside a registered test case
    ///
    /// Addon kinds are not dispatchable here; they only run through
    /// registered test cases.
    pub async fn run_ad_hoc(&self, spec: &ActionSpec) -> Result<ActionOutcome> {
        let (kind, perform_check) = spec.parse_kind()?;
        if let ActionKind::Addon { name, .. } = &kind {
            return Err(Error::UnknownActionKind(name.clone()));
        }
        let action = Action {
            index: 0,
            suite_id: String::new(),
            test_id: String::new(),
            perform_check,
            kind,
        };
        self.admit(&action, Admission::Counted).await?;
        self.dispatch(&action, None, None).await
    }

    /// Count this dispatch against the global ceiling
    ///
    /// The first trip marks the run aborted, emits the overflow
    /// notification, and resolves the pending wait so the run can end.
    /// Exempt dispatches (cleanup) neither count nor get refused.
    async fn admit(&self, action: &Action, admission: Admission) -> Result<()> {
        if admission == Admission::Exempt {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        if state.aborted {
            return Err(Error::ActionLimitExceeded(state.dispatched));
        }
        if state.max_actions > 0 && state.dispatched >= state.max_actions {
            state.aborted = true;
            let limit = state.max_actions;
            drop(state);
            tracing::error!(limit, kind = action.kind.tag(), "Action limit exceeded");
            self.notifier.publish(Notification::Overflow { limit });
            self.waiter.complete();
            return Err(Error::ActionLimitExceeded(limit));
        }
        state.dispatched += 1;
        Ok(())
    }

    /// Record a check outcome and signal the wait scheduler when the
    /// running total reaches the expected count
    async fn report_check(&self, ok: bool, action: &Action) {
        let check = CheckResult {
            index: action.index,
            suite_id: action.suite_id.clone(),
            test_id: action.test_id.clone(),
            result: ok,
        };
        let recorded = {
            let mut state = self.state.lock().await;
            state.ledger.record(check.clone())
        };
        match recorded {
            RecordOutcome::Recorded { complete } => {
                self.notifier.publish(Notification::Check {
                    index: check.index,
                    suite_id: check.suite_id,
                    test_id: check.test_id,
                    result: ok,
                });
                if complete {
                    self.waiter.complete();
                }
            }
            RecordOutcome::Saturated => {
                tracing::warn!(index = check.index, "Check reported past expected total");
            }
        }
    }

    /// Execute one action in isolation
    async fn dispatch(
        &self,
        action: &Action,
        node: Option<&str>,
        mut msg: Option<&mut Message>,
    ) -> Result<ActionOutcome> {
        tracing::trace!(kind = action.kind.tag(), index = action.index, "Dispatching action");

        match &action.kind {
            ActionKind::Send { target, value } => {
                // Fire-and-forget: delivery problems are the graph's to
                // report, not this action's
                let outbound = Message::with_payload(value.clone());
                if let Err(e) = self.graph.inject(target, outbound).await {
                    tracing::warn!(target, error = %e, "Send delivery failed");
                }
                Ok(ActionOutcome::default())
            }

            ActionKind::Click { node } => {
                self.notifier.publish(Notification::Click { node: node.clone() });
                Ok(ActionOutcome::default())
            }

            ActionKind::Log { value } => {
                let text = log_text(value);
                tracing::info!(target: "flowtest::run", "{}", text);
                self.notifier.publish(Notification::Log { text });
                Ok(ActionOutcome::default())
            }

            ActionKind::Set { target, source } => {
                let value = self.coerce_source(source, node, msg.as_deref()).await?;
                self.write_target(target, value, msg.as_deref_mut()).await?;
                Ok(ActionOutcome::default())
            }

            ActionKind::Match { expected } => {
                let actual = msg.as_deref().and_then(Message::payload);
                let ok = actual == Some(expected);
                Ok(ActionOutcome {
                    check: Some(ok),
                    value: Value::Null,
                })
            }

            ActionKind::Wait { ms } => {
                self.waiter.wait(*ms).await;
                Ok(ActionOutcome::default())
            }

            ActionKind::Function { code } => {
                let mut scope = EvalScope::new(node, msg.as_deref(), action.perform_check);
                let value = self.evaluator.eval(code, &mut scope).await?;
                for line in scope.take_logs() {
                    tracing::info!(target: "flowtest::run", "{}", line);
                    self.notifier.publish(Notification::Log { text: line });
                }
                Ok(ActionOutcome {
                    check: scope.check_outcome(),
                    value,
                })
            }

            ActionKind::Addon { name, params } => {
                let Some(addon) = self.addons.resolve(name) else {
                    return Err(Error::UnknownActionKind(name.clone()));
                };
                let ctx = AddonContext {
                    params,
                    node,
                    msg: msg.as_deref(),
                };
                // Addon-internal errors convert to a failed check; they
                // never propagate further
                let check = match addon.execute(ctx).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(addon = %name, error = %e, "Addon execute failed");
                        false
                    }
                };
                Ok(ActionOutcome {
                    check: Some(check),
                    value: Value::Null,
                })
            }
        }
    }

    /// Coerce a typed `set` source into a concrete value
    async fn coerce_source(
        &self,
        source: &SetSource,
        node: Option<&str>,
        msg: Option<&Message>,
    ) -> Result<Value> {
        match source {
            SetSource::Str(s) => Ok(Value::String(s.clone())),
            SetSource::Num(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .ok_or_else(|| Error::malformed("set", "source 'num' is not finite")),
            SetSource::Bool(b) => Ok(Value::Bool(*b)),
            SetSource::Json(text) => {
                serde_json::from_str(text).map_err(|e| Error::malformed("set", e.to_string()))
            }
            SetSource::Bin(text) => {
                let bytes: Vec<u8> = serde_json::from_str(text)
                    .map_err(|e| Error::malformed("set", format!("binary source: {}", e)))?;
                Ok(Value::Array(bytes.into_iter().map(Value::from).collect()))
            }
            // Patterns are carried verbatim; matching them is a consumer
            // concern
            SetSource::Re(pattern) => Ok(Value::String(pattern.clone())),
            SetSource::Date => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_err(|e| Error::Internal(e.to_string()))?;
                Ok(Value::from(now.as_millis() as u64))
            }
            SetSource::Env(name) => std::env::var(name)
                .map(Value::String)
                .map_err(|_| Error::malformed("set", format!("environment variable '{}' not set", name))),
            SetSource::Expr(code) => {
                let mut scope = EvalScope::new(node, msg, false);
                self.evaluator.eval(code, &mut scope).await
            }
        }
    }

    /// Write a coerced value into the `set` destination
    async fn write_target(
        &self,
        target: &SetTarget,
        value: Value,
        msg: Option<&mut Message>,
    ) -> Result<()> {
        match target {
            SetTarget::Msg(prop) => {
                let msg = msg.ok_or_else(|| {
                    Error::malformed("set", "destination 'msg' but no message is current")
                })?;
                msg.set_path(prop, value);
                Ok(())
            }
            SetTarget::Flow(key) => {
                let key = resolve_key(key, msg.as_deref())?;
                self.state.lock().await.context.set_flow(None, &key, value);
                Ok(())
            }
            SetTarget::Global(key) => {
                let key = resolve_key(key, msg.as_deref())?;
                self.state.lock().await.context.set_global(&key, value);
                Ok(())
            }
        }
    }
}

fn log_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
