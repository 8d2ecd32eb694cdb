//! CLI command handling
//!
//! Dispatches CLI commands to the daemon and formats output.

mod spawn;

use std::collections::BTreeMap;

use colored::Colorize;
use serde_json::{json, Value};

use crate::commands::Commands;
use crate::common::{logging, Error, Result};
use crate::engine::{ActionSpec, Notification};
use crate::ipc::protocol::Command;
use crate::ipc::DaemonClient;
use crate::suite::TestCaseInfo;

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Daemon => {
            // Should never happen - daemon mode is handled in main
            unreachable!("Daemon command should be handled in main")
        }

        Commands::List { json } => {
            spawn::ensure_daemon_running().await?;
            let mut client = DaemonClient::connect().await?;
            let result = client.send_command(Command::ListTestCases).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }

            let cases: Vec<TestCaseInfo> = serde_json::from_value(result["cases"].clone())?;
            if cases.is_empty() {
                println!("No test cases configured");
                return Ok(());
            }

            let mut current_suite = String::new();
            for (i, case) in cases.iter().enumerate() {
                if case.suite_id != current_suite {
                    println!("{}", case.suite_name.white().bold());
                    current_suite = case.suite_id.clone();
                }
                println!(
                    "  {:>3}. {} {}",
                    i + 1,
                    case.test_name,
                    format!("({}/{})", case.suite_id, case.test_id).dimmed()
                );
            }
            Ok(())
        }

        Commands::Run { test, json } => {
            spawn::ensure_daemon_running().await?;
            let mut client = DaemonClient::connect().await?;

            let (suite_id, test_id) = resolve_selector(&mut client, &test).await?;
            let result = client
                .send_command(Command::RunTestCase {
                    suite_id: suite_id.clone(),
                    test_id: test_id.clone(),
                })
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_run_result(&suite_id, &test_id, &result);
            }

            // Nonzero exit on failure so scripts can gate on it
            if result["passed"] != json!(true) {
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::Init => {
            spawn::ensure_daemon_running().await?;
            let mut client = DaemonClient::connect().await?;
            client.send_command(Command::Init).await?;
            println!("Engine initialized, hooks installed");
            Ok(())
        }

        Commands::Register {
            event,
            actions,
            suite,
            test,
        } => {
            let content = std::fs::read_to_string(&actions).map_err(|e| Error::FileRead {
                path: actions.display().to_string(),
                error: e.to_string(),
            })?;
            let by_node: BTreeMap<String, Vec<ActionSpec>> = serde_json::from_str(&content)?;
            let actions: Vec<(String, Vec<ActionSpec>)> = by_node.into_iter().collect();

            let mut client = DaemonClient::connect().await?;
            let result = client
                .send_command(Command::RegisterActions {
                    event,
                    actions,
                    suite_id: suite,
                    test_id: test,
                })
                .await?;
            println!("Registered {} actions", result["registered"]);
            Ok(())
        }

        Commands::Setup { max_actions } => {
            let mut client = DaemonClient::connect().await?;
            let result = client.send_command(Command::Setup { max_actions }).await?;
            println!(
                "Setup complete, expecting {} checks",
                result["expected_checks"]
            );
            Ok(())
        }

        Commands::Cleanup { json } => {
            let mut client = DaemonClient::connect().await?;
            let result = client.send_command(Command::Cleanup).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_run_result("adhoc", "adhoc", &result);
            }
            Ok(())
        }

        Commands::Send { target, value } => {
            let mut client = DaemonClient::connect().await?;
            client
                .send_command(Command::Send {
                    target: target.clone(),
                    value: parse_value(&value),
                })
                .await?;
            println!("Sent to {}", target);
            Ok(())
        }

        Commands::Log { value } => {
            let mut client = DaemonClient::connect().await?;
            client
                .send_command(Command::Log {
                    value: parse_value(&value),
                })
                .await?;
            Ok(())
        }

        Commands::Set { target, source } => {
            let mut client = DaemonClient::connect().await?;
            client
                .send_command(Command::Set {
                    target: serde_json::from_str(&target)?,
                    source: serde_json::from_str(&source)?,
                })
                .await?;
            println!("Value set");
            Ok(())
        }

        Commands::Wait { ms } => {
            let mut client = DaemonClient::connect().await?;
            client.send_command(Command::Wait { ms }).await?;
            println!("Wait resolved");
            Ok(())
        }

        Commands::Function { code } => {
            let mut client = DaemonClient::connect().await?;
            let result = client.send_command(Command::Function { code }).await?;
            println!("{}", serde_json::to_string_pretty(&result["value"])?);
            Ok(())
        }

        Commands::Watch { json } => {
            spawn::ensure_daemon_running().await?;
            let client = DaemonClient::connect().await?;
            let mut stream = client.subscribe().await?;
            eprintln!("{}", "Watching run notifications (Ctrl+C to stop)".dimmed());

            while let Some(notification) = stream.next().await? {
                if json {
                    println!("{}", serde_json::to_string(&notification)?);
                } else {
                    print_notification(&notification);
                }
            }
            Ok(())
        }

        Commands::Logs { lines } => {
            let Some(path) = logging::daemon_log_path() else {
                println!("Log path unavailable on this platform");
                return Ok(());
            };
            if !path.exists() {
                println!("No daemon log at {}", path.display());
                return Ok(());
            }
            let content = std::fs::read_to_string(&path).map_err(|e| Error::FileRead {
                path: path.display().to_string(),
                error: e.to_string(),
            })?;
            let all: Vec<&str> = content.lines().collect();
            let start = all.len().saturating_sub(lines);
            for line in &all[start..] {
                println!("{}", line);
            }
            Ok(())
        }

        Commands::Stop => {
            match DaemonClient::connect().await {
                Ok(mut client) => {
                    client.send_command(Command::Shutdown).await?;
                    println!("Daemon stopped");
                }
                Err(Error::DaemonNotRunning) => {
                    println!("Daemon is not running");
                }
                Err(e) => return Err(e),
            }
            Ok(())
        }
    }
}

/// Resolve a test selector to a (suite_id, test_id) pair
///
/// Accepts "<suite_id>/<test_id>" directly, or a 1-based index into the
/// flattened test list as shown by `list`.
async fn resolve_selector(client: &mut DaemonClient, selector: &str) -> Result<(String, String)> {
    if let Some((suite_id, test_id)) = selector.split_once('/') {
        return Ok((suite_id.to_string(), test_id.to_string()));
    }

    let index: usize = selector.parse().map_err(|_| {
        Error::InvalidSelector(format!(
            "'{}' is neither an index nor a suite/test pair",
            selector
        ))
    })?;

    let result = client.send_command(Command::ListTestCases).await?;
    let cases: Vec<TestCaseInfo> = serde_json::from_value(result["cases"].clone())?;
    let case = index
        .checked_sub(1)
        .and_then(|i| cases.get(i))
        .ok_or_else(|| {
            Error::InvalidSelector(format!(
                "index {} out of range (have {} test cases)",
                index,
                cases.len()
            ))
        })?;
    Ok((case.suite_id.clone(), case.test_id.clone()))
}

/// Treat the argument as JSON when it parses, otherwise as a bare string
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn print_run_result(suite_id: &str, test_id: &str, result: &Value) {
    let all = result["result"]["all"].as_u64().unwrap_or(0);
    let success = result["result"]["success"].as_u64().unwrap_or(0);
    let fail = result["result"]["fail"].as_u64().unwrap_or(0);
    let expected = result["result"]["expected"].as_u64().unwrap_or(0);
    let aborted = result["result"]["aborted"].as_bool().unwrap_or(false);
    let passed = result["passed"].as_bool().unwrap_or(false);

    let verdict = if passed {
        format!("{} {}", "✓".green().bold(), "PASS".green().bold())
    } else {
        format!("{} {}", "✗".red().bold(), "FAIL".red().bold())
    };
    println!("{}  {}/{}", verdict, suite_id, test_id);
    println!(
        "  checks: {} of {} expected, {} passed, {} failed",
        all, expected, success, fail
    );
    if aborted {
        println!("  {}", "run aborted: action limit exceeded".red());
    }
    if let Some(failures) = result["info"]["fail"].as_array() {
        for failure in failures {
            println!(
                "  {} check #{} failed",
                "✗".red(),
                failure["index"].as_u64().unwrap_or(0)
            );
        }
    }
}

fn print_notification(notification: &Notification) {
    match notification {
        Notification::Log { text } => {
            println!("{} {}", "log".cyan(), text);
        }
        Notification::Click { node } => {
            println!("{} {}", "click".cyan(), node);
        }
        Notification::Check {
            index,
            suite_id,
            test_id,
            result,
        } => {
            let mark = if *result { "✓".green() } else { "✗".red() };
            println!("{} check #{} ({}/{})", mark, index, suite_id, test_id);
        }
        Notification::Overflow { limit } => {
            println!(
                "{} {}",
                "✗".red().bold(),
                format!("action limit of {} exceeded, run aborting", limit).red()
            );
        }
        Notification::RunFinished {
            suite_id,
            test_id,
            all,
            success,
            fail,
            aborted,
        } => {
            let verdict = if *fail == 0 && !aborted {
                "finished".green()
            } else {
                "finished".red()
            };
            println!(
                "{} {}/{}: {} checks, {} passed, {} failed{}",
                verdict,
                suite_id,
                test_id,
                all,
                success,
                fail,
                if *aborted { ", aborted" } else { "" }
            );
        }
    }
}
