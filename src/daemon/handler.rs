//! Command handler for processing IPC requests
//!
//! Translates IPC commands into orchestrator and engine calls.

use serde_json::{json, Value};

use crate::common::{error::IpcError, Result};
use crate::engine::{ActionSpec, RunResult};
use crate::ipc::protocol::{Command, Response};
use crate::suite;

use super::TestHost;

/// Handle an IPC command
pub async fn handle_command(host: &TestHost, id: u64, command: Command) -> Response {
    match handle_command_inner(host, command).await {
        Ok(result) => Response::success(id, result),
        Err(e) => Response::error(id, IpcError::from(&e)),
    }
}

async fn handle_command_inner(host: &TestHost, command: Command) -> Result<Value> {
    match command {
        // === Run lifecycle ===
        Command::Init => {
            host.orchestrator.init().await;
            Ok(json!({ "status": "initialized" }))
        }

        Command::RegisterActions {
            event,
            actions,
            suite_id,
            test_id,
        } => {
            let count = host
                .orchestrator
                .register_event(&event, &actions, &suite_id, &test_id)
                .await?;
            Ok(json!({ "registered": count }))
        }

        Command::Setup { max_actions } => {
            host.orchestrator.run_setup(max_actions).await?;
            Ok(json!({
                "status": "setup_complete",
                "expected_checks": host.orchestrator.engine().expected_checks().await,
            }))
        }

        Command::Cleanup => {
            host.orchestrator.run_cleanup().await?;
            let result = host.orchestrator.engine().snapshot_result().await;
            Ok(run_result_json(&result))
        }

        // === Ad hoc actions ===
        Command::Send { target, value } => {
            let spec = ActionSpec::new("send", json!({ "target": &target, "value": value }));
            host.orchestrator.engine().run_ad_hoc(&spec).await?;
            Ok(json!({ "status": "sent", "target": target }))
        }

        Command::Log { value } => {
            let spec = ActionSpec::new("log", json!({ "value": value }));
            host.orchestrator.engine().run_ad_hoc(&spec).await?;
            Ok(json!({ "status": "logged" }))
        }

        Command::Set { target, source } => {
            let spec = ActionSpec::new("set", json!({ "target": target, "source": source }));
            host.orchestrator.engine().run_ad_hoc(&spec).await?;
            Ok(json!({ "status": "set" }))
        }

        Command::Wait { ms } => {
            let spec = ActionSpec::new("wait", json!({ "ms": ms }));
            let outcome = host.orchestrator.engine().run_ad_hoc(&spec).await?;
            Ok(json!({ "status": "wait_resolved", "outcome": outcome.value }))
        }

        Command::Function { code } => {
            let spec = ActionSpec::new("function", json!({ "code": code }));
            let outcome = host.orchestrator.engine().run_ad_hoc(&spec).await?;
            Ok(json!({ "value": outcome.value, "check": outcome.check }))
        }

        // === Test cases ===
        Command::ListTestCases => {
            let cases = suite::list_cases(&host.suites);
            Ok(json!({ "cases": cases }))
        }

        Command::RunTestCase { suite_id, test_id } => {
            let (suite, test) = suite::find_case(&host.suites, &suite_id, &test_id)?;
            let result = host.orchestrator.run_test_case(suite, test).await?;
            Ok(run_result_json(&result))
        }

        // Subscribe and Shutdown are intercepted by the server loop
        Command::Subscribe | Command::Shutdown => Ok(json!({})),
    }
}

/// The run-result shape reported to clients
fn run_result_json(result: &RunResult) -> Value {
    json!({
        "result": {
            "all": result.all(),
            "success": result.success_count(),
            "fail": result.fail_count(),
            "expected": result.expected_checks,
            "aborted": result.aborted,
        },
        "passed": result.passed(),
        "info": {
            "success": result.success,
            "fail": result.fail,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CheckResult;

    #[test]
    fn run_result_shape() {
        let result = RunResult {
            expected_checks: 2,
            success: vec![CheckResult {
                index: 0,
                suite_id: "s".to_string(),
                test_id: "t".to_string(),
                result: true,
            }],
            fail: vec![],
            aborted: false,
        };
        let value = run_result_json(&result);
        assert_eq!(value["result"]["all"], 1);
        assert_eq!(value["result"]["expected"], 2);
        assert_eq!(value["passed"], false);
        assert_eq!(value["info"]["success"][0]["index"], 0);
    }
}
