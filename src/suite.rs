//! Test suite and test case definitions
//!
//! Suites live in a JSON file owned by the graph configuration:
//!
//! ```json
//! [{
//!   "id": "suite-1", "name": "Sensors",
//!   "tests": [{
//!     "id": "t1", "name": "happy path", "timeout_ms": 500,
//!     "actions": {
//!       "setup": {"_global_": [{"kind": "send", "target": "up", "value": "ok"}]},
//!       "recv":  {"n1": [{"kind": "match", "value": "ok"}]}
//!     }
//!   }]
//! }]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::common::{Error, Result};
use crate::engine::action::ActionSpec;

/// Default per-run timeout when a test case does not set one
pub const DEFAULT_TIMEOUT_MS: u64 = 3_000;

/// Default global action-count ceiling
pub const DEFAULT_MAX_ACTIONS: usize = 1_000;

/// An ordered collection of test cases, tied to one graph deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuite {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tests: Vec<TestCase>,
}

/// One scripted test case, immutable once loaded for a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_actions: Option<usize>,
    /// event category → node id (or the reserved global key) → actions
    #[serde(default)]
    pub actions: BTreeMap<String, BTreeMap<String, Vec<ActionSpec>>>,
}

/// Flat suite/test listing entry for the control surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseInfo {
    pub suite_id: String,
    pub suite_name: String,
    pub test_id: String,
    pub test_name: String,
}

/// Load suites from a JSON file
pub fn load_suites(path: &Path) -> Result<Vec<TestSuite>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    Ok(serde_json::from_str(&content)?)
}

/// Flatten suites into listing entries, in declaration order
pub fn list_cases(suites: &[TestSuite]) -> Vec<TestCaseInfo> {
    suites
        .iter()
        .flat_map(|suite| {
            suite.tests.iter().map(|test| TestCaseInfo {
                suite_id: suite.id.clone(),
                suite_name: suite.name.clone(),
                test_id: test.id.clone(),
                test_name: test.name.clone(),
            })
        })
        .collect()
}

/// Find a test case by suite and test id
pub fn find_case<'a>(
    suites: &'a [TestSuite],
    suite_id: &str,
    test_id: &str,
) -> Result<(&'a TestSuite, &'a TestCase)> {
    suites
        .iter()
        .find(|s| s.id == suite_id)
        .and_then(|suite| {
            suite
                .tests
                .iter()
                .find(|t| t.id == test_id)
                .map(|test| (suite, test))
        })
        .ok_or_else(|| Error::TestCaseNotFound {
            suite_id: suite_id.to_string(),
            test_id: test_id.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<TestSuite> {
        serde_json::from_str(
            r#"[
                {"id": "s1", "name": "Suite One", "tests": [
                    {"id": "t1", "name": "first"},
                    {"id": "t2", "name": "second", "timeout_ms": 50}
                ]},
                {"id": "s2", "name": "Suite Two", "tests": [
                    {"id": "t1", "name": "other",
                     "actions": {"recv": {"n1": [{"kind": "match", "value": "ok"}]}}}
                ]}
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn listing_flattens_in_order() {
        let cases = list_cases(&sample());
        assert_eq!(cases.len(), 3);
        assert_eq!(cases[0].suite_id, "s1");
        assert_eq!(cases[0].test_id, "t1");
        assert_eq!(cases[2].suite_id, "s2");
    }

    #[test]
    fn find_case_resolves_ids() {
        let suites = sample();
        let (suite, test) = find_case(&suites, "s1", "t2").unwrap();
        assert_eq!(suite.name, "Suite One");
        assert_eq!(test.timeout_ms, Some(50));

        assert!(matches!(
            find_case(&suites, "s1", "missing"),
            Err(Error::TestCaseNotFound { .. })
        ));
    }

    #[test]
    fn actions_deserialize_with_spec_params() {
        let suites = sample();
        let (_, test) = find_case(&suites, "s2", "t1").unwrap();
        let recv = &test.actions["recv"]["n1"];
        assert_eq!(recv[0].kind, "match");
        assert_eq!(recv[0].params.get("value"), Some(&serde_json::json!("ok")));
    }
}
