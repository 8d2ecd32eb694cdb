//! End-to-end tests driving full test-case runs through the orchestrator
//!
//! Each test builds an in-process graph, loads a scripted test case, runs
//! it, and asserts on the aggregated result and the notification stream.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;

use flowtest::engine::{
    AddonAction, AddonContext, Engine, Notification, Orchestrator, RunDefaults,
};
use flowtest::graph::sim::SimGraph;
use flowtest::suite::{self, TestCase, TestSuite};
use flowtest::Result;

/// inject → uut → sink, the smallest interesting topology
fn build_graph() -> Arc<SimGraph> {
    let graph = Arc::new(SimGraph::new());
    graph.add_node("inject", &["uut"]);
    graph.add_node("uut", &["sink"]);
    graph.add_node("sink", &[]);
    graph
}

fn orchestrator(graph: Arc<SimGraph>) -> Orchestrator {
    let engine = Engine::new(graph);
    Orchestrator::with_defaults(
        engine,
        RunDefaults {
            timeout_ms: 200,
            max_actions: 100,
        },
    )
}

fn suite_of(tests: serde_json::Value) -> TestSuite {
    serde_json::from_value(json!({
        "id": "s1",
        "name": "integration",
        "tests": tests,
    }))
    .unwrap()
}

fn case(value: serde_json::Value) -> TestCase {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn matching_payload_passes() {
    let orch = orchestrator(build_graph());
    let suite = suite_of(json!([]));
    let test = case(json!({
        "id": "t1", "name": "happy path",
        "actions": {
            "setup": {"_global_": [{"kind": "send", "target": "inject", "value": "ok"}]},
            "recv":  {"uut": [{"kind": "match", "value": "ok"}]}
        }
    }));

    let result = orch.run_test_case(&suite, &test).await.unwrap();
    assert_eq!(result.expected_checks, 1);
    assert_eq!(result.success_count(), 1);
    assert_eq!(result.fail_count(), 0);
    assert!(!result.aborted);
    assert!(result.passed());
}

#[tokio::test]
async fn mismatched_payload_fails() {
    let orch = orchestrator(build_graph());
    let suite = suite_of(json!([]));
    let test = case(json!({
        "id": "t2", "name": "mismatch",
        "actions": {
            "setup": {"_global_": [{"kind": "send", "target": "inject", "value": "actual"}]},
            "recv":  {"uut": [{"kind": "match", "value": "expected"}]}
        }
    }));

    let result = orch.run_test_case(&suite, &test).await.unwrap();
    assert_eq!(result.all(), 1);
    assert_eq!(result.fail_count(), 1);
    assert!(!result.passed());
}

#[tokio::test]
async fn timeout_reports_what_actually_happened() {
    let orch = orchestrator(build_graph());
    let suite = suite_of(json!([]));
    // The expected check never arrives: nothing is sent to the graph
    let test = case(json!({
        "id": "t3", "name": "silence", "timeout_ms": 50,
        "actions": {
            "recv": {"uut": [{"kind": "match", "value": "never"}]}
        }
    }));

    let started = Instant::now();
    let result = orch.run_test_case(&suite, &test).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(50));

    assert_eq!(result.expected_checks, 1);
    // No stale estimate: zero outcomes were recorded, zero are reported
    assert_eq!(result.all(), 0);
    assert!(!result.aborted);
    assert!(!result.passed());
}

#[tokio::test]
async fn action_ceiling_aborts_before_the_next_action() {
    let orch = orchestrator(build_graph());
    let mut notifications = orch.engine().notifier().subscribe();

    let suite = suite_of(json!([]));
    let test = case(json!({
        "id": "t4", "name": "overflow", "max_actions": 2, "timeout_ms": 50,
        "actions": {
            "setup": {"_global_": [
                {"kind": "log", "value": "one"},
                {"kind": "log", "value": "two"},
                {"kind": "log", "value": "three"}
            ]}
        }
    }));

    let result = orch.run_test_case(&suite, &test).await.unwrap();
    assert!(result.aborted);
    assert!(!result.passed());

    let mut logs = 0;
    let mut overflows = 0;
    while let Ok(notification) = notifications.try_recv() {
        match notification {
            Notification::Log { .. } => logs += 1,
            Notification::Overflow { .. } => overflows += 1,
            _ => {}
        }
    }
    // The third log never ran, and the overflow fired exactly once
    assert_eq!(logs, 2);
    assert_eq!(overflows, 1);
}

#[tokio::test]
async fn cleanup_still_runs_after_an_overflow() {
    let orch = orchestrator(build_graph());
    let mut notifications = orch.engine().notifier().subscribe();

    let suite = suite_of(json!([]));
    let test = case(json!({
        "id": "t11", "name": "teardown survives overflow", "max_actions": 1, "timeout_ms": 50,
        "actions": {
            "setup": {"_global_": [
                {"kind": "log", "value": "s1"},
                {"kind": "log", "value": "s2"}
            ]},
            "cleanup": {"_global_": [{"kind": "log", "value": "teardown"}]}
        }
    }));

    let result = orch.run_test_case(&suite, &test).await.unwrap();
    assert!(result.aborted);

    let mut logs = Vec::new();
    while let Ok(notification) = notifications.try_recv() {
        if let Notification::Log { text } = notification {
            logs.push(text);
        }
    }
    // The ceiling stopped setup, but teardown ran regardless
    assert_eq!(logs, vec!["s1", "teardown"]);
}

#[tokio::test]
async fn completed_checks_end_the_run_before_the_timeout() {
    let orch = orchestrator(build_graph());
    let suite = suite_of(json!([]));
    let test = case(json!({
        "id": "t5", "name": "early exit", "timeout_ms": 10_000,
        "actions": {
            "setup": {"_global_": [{"kind": "send", "target": "inject", "value": 7}]},
            "recv":  {"uut": [{"kind": "match", "value": 7}]}
        }
    }));

    let started = Instant::now();
    let result = orch.run_test_case(&suite, &test).await.unwrap();
    assert!(result.passed());
    // Far below the 10s ceiling: the last check resolved the wait
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn stubbed_node_reroutes_instead_of_forwarding() {
    let orch = orchestrator(build_graph());
    let suite = suite_of(json!([]));
    // uut is stubbed: it echoes a canned payload straight to sink, and its
    // own wiring is suppressed
    let test = case(json!({
        "id": "t6", "name": "stub", "timeout_ms": 200,
        "actions": {
            "setup": {"_global_": [{"kind": "send", "target": "inject", "value": "raw"}]},
            "stub":  {"uut": [{"kind": "send", "target": "sink", "value": "canned"}]},
            "recv":  {"sink": [{"kind": "match", "value": "canned"}]}
        }
    }));

    let result = orch.run_test_case(&suite, &test).await.unwrap();
    assert_eq!(result.success_count(), 1);
    assert!(result.passed());
}

#[tokio::test]
async fn set_then_match_sees_the_written_payload() {
    let orch = orchestrator(build_graph());
    let suite = suite_of(json!([]));
    let test = case(json!({
        "id": "t7", "name": "set visibility", "timeout_ms": 200,
        "actions": {
            "setup": {"_global_": [{"kind": "send", "target": "inject", "value": "ignored"}]},
            "recv":  {"uut": [
                {"kind": "set",
                 "target": {"type": "msg", "value": "payload"},
                 "source": {"type": "json", "value": "{\"rewritten\": true}"}},
                {"kind": "match", "value": {"rewritten": true}}
            ]}
        }
    }));

    let result = orch.run_test_case(&suite, &test).await.unwrap();
    assert_eq!(result.success_count(), 1);
    assert!(result.passed());
}

struct LifecycleAddon {
    starts: AtomicUsize,
    ends: AtomicUsize,
    executes: AtomicUsize,
}

#[async_trait]
impl AddonAction for LifecycleAddon {
    fn name(&self) -> &str {
        "addon:lifecycle"
    }

    async fn execute(&self, _ctx: AddonContext<'_>) -> Result<()> {
        self.executes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_test_start(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_test_end(&self) -> Result<()> {
        self.ends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn engaged_addon_gets_lifecycle_calls_and_a_check() {
    let orch = orchestrator(build_graph());
    let addon = Arc::new(LifecycleAddon {
        starts: AtomicUsize::new(0),
        ends: AtomicUsize::new(0),
        executes: AtomicUsize::new(0),
    });
    orch.engine().addons().register(addon.clone());

    let suite = suite_of(json!([]));
    let test = case(json!({
        "id": "t8", "name": "addon", "timeout_ms": 200,
        "actions": {
            "setup": {"_global_": [
                {"kind": "addon:lifecycle", "check": true, "note": "hello"}
            ]}
        }
    }));

    let result = orch.run_test_case(&suite, &test).await.unwrap();
    assert_eq!(addon.starts.load(Ordering::SeqCst), 1);
    assert_eq!(addon.ends.load(Ordering::SeqCst), 1);
    assert_eq!(addon.executes.load(Ordering::SeqCst), 1);
    // execute success converted to a passing check
    assert_eq!(result.success_count(), 1);
    assert!(result.passed());
}

#[tokio::test]
async fn unknown_event_in_test_case_rejects_the_run() {
    let orch = orchestrator(build_graph());
    let suite = suite_of(json!([]));
    let test = case(json!({
        "id": "t9", "name": "bad event",
        "actions": {
            "bogus": {"_global_": [{"kind": "log", "value": "x"}]}
        }
    }));

    assert!(orch.run_test_case(&suite, &test).await.is_err());
}

#[test]
fn suites_load_from_json_files() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"[{{
            "id": "s1", "name": "Sensors",
            "tests": [
                {{"id": "t1", "name": "first", "actions": {{}}}},
                {{"id": "t2", "name": "second", "timeout_ms": 100, "actions": {{}}}}
            ]
        }}]"#
    )
    .unwrap();

    let suites = suite::load_suites(file.path()).unwrap();
    assert_eq!(suites.len(), 1);
    assert_eq!(suites[0].tests[1].timeout_ms, Some(100));

    let cases = suite::list_cases(&suites);
    assert_eq!(cases.len(), 2);
    assert_eq!(cases[0].test_id, "t1");

    let (suite, test) = suite::find_case(&suites, "s1", "t2").unwrap();
    assert_eq!(suite.name, "Sensors");
    assert_eq!(test.id, "t2");

    assert!(suite::find_case(&suites, "s1", "missing").is_err());
}

#[tokio::test]
async fn run_finished_notification_carries_the_tallies() {
    let orch = orchestrator(build_graph());
    let mut notifications = orch.engine().notifier().subscribe();

    let suite = suite_of(json!([]));
    let test = case(json!({
        "id": "t10", "name": "summary", "timeout_ms": 200,
        "actions": {
            "setup": {"_global_": [{"kind": "send", "target": "inject", "value": "ok"}]},
            "recv":  {"uut": [{"kind": "match", "value": "ok"}]}
        }
    }));

    orch.run_test_case(&suite, &test).await.unwrap();

    let mut finished = None;
    while let Ok(notification) = notifications.try_recv() {
        if let Notification::RunFinished {
            suite_id,
            test_id,
            all,
            success,
            fail,
            aborted,
        } = notification
        {
            finished = Some((suite_id, test_id, all, success, fail, aborted));
        }
    }
    let (suite_id, test_id, all, success, fail, aborted) = finished.expect("no RunFinished seen");
    assert_eq!(suite_id, "s1");
    assert_eq!(test_id, "t10");
    assert_eq!((all, success, fail, aborted), (1, 1, 0, false));
}
