//! IPC protocol message types
//!
//! Defines the request/response format for CLI ↔ daemon communication,
//! plus the push frames carrying real-time notifications to subscribers.
//! Uses a simple length-prefixed JSON protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::error::IpcError;
use crate::engine::{ActionSpec, Notification};

/// IPC request from CLI to daemon
#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for matching responses
    pub id: u64,
    /// The command to execute
    pub command: Command,
}

/// IPC response from daemon to CLI
#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    /// Request ID this response corresponds to
    pub id: u64,
    /// Whether the command succeeded
    pub success: bool,
    /// Result data on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error information on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<IpcError>,
}

impl Response {
    /// Create a success response
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: u64, error: IpcError) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(error),
        }
    }

    /// Create a success response with no data
    pub fn ok(id: u64) -> Self {
        Self {
            id,
            success: true,
            result: Some(serde_json::json!({})),
            error: None,
        }
    }
}

/// A frame pushed to a subscribed connection
///
/// Progress streams over subscribed connections, separate from the
/// request/response traffic.
#[derive(Debug, Serialize, Deserialize)]
pub struct Push {
    pub notification: Notification,
}

/// Commands that can be sent from CLI to daemon
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    // === Run lifecycle ===
    /// Install hooks and reset engine state
    Init,

    /// Populate the action map for one event category
    RegisterActions {
        event: String,
        /// node id (or the reserved global key) → ordered action specs
        actions: Vec<(String, Vec<ActionSpec>)>,
        suite_id: String,
        test_id: String,
    },

    /// Run setup actions with an optional action-count ceiling
    Setup { max_actions: Option<usize> },

    /// Run cleanup actions and remove hooks
    Cleanup,

    // === Ad hoc actions (diagnostic/manual-drive mode) ===
    /// Deliver a payload to a named node
    Send { target: String, value: Value },

    /// Record a diagnostic log line
    Log { value: Value },

    /// Coerce a typed source and write it to a destination
    Set { target: Value, source: Value },

    /// Start a timed wait
    Wait { ms: u64 },

    /// Evaluate externally supplied code
    Function { code: String },

    // === Test cases ===
    /// List suite/test id-name pairs from the loaded configuration
    ListTestCases,

    /// Full orchestrated run of one test case
    RunTestCase { suite_id: String, test_id: String },

    // === Streaming ===
    /// Switch this connection to the notification stream
    Subscribe,

    // === Shutdown ===
    /// Shutdown the daemon
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_roundtrip() {
        let cmd = Command::RegisterActions {
            event: "recv".to_string(),
            actions: vec![(
                "n1".to_string(),
                vec![ActionSpec::new("match", json!({"value": "ok"}))],
            )],
            suite_id: "s".to_string(),
            test_id: "t".to_string(),
        };
        let text = serde_json::to_string(&cmd).unwrap();
        assert!(text.contains(r#""type":"register_actions""#));

        let back: Command = serde_json::from_str(&text).unwrap();
        match back {
            Command::RegisterActions { event, actions, .. } => {
                assert_eq!(event, "recv");
                assert_eq!(actions[0].1[0].kind, "match");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_response_shapes() {
        let ok = Response::success(7, json!({"result": {"all": 1}}));
        let text = serde_json::to_string(&ok).unwrap();
        assert!(!text.contains("error"));

        let err = Response::error(
            8,
            IpcError {
                code: "UNKNOWN_EVENT".to_string(),
                message: "bogus".to_string(),
            },
        );
        let back: Response = serde_json::from_str(&serde_json::to_string(&err).unwrap()).unwrap();
        assert!(!back.success);
        assert_eq!(back.error.unwrap().code, "UNKNOWN_EVENT");
    }

    #[test]
    fn test_push_frame_roundtrip() {
        let push = Push {
            notification: Notification::Overflow { limit: 10 },
        };
        let text = serde_json::to_string(&push).unwrap();
        let back: Push = serde_json::from_str(&text).unwrap();
        assert!(matches!(back.notification, Notification::Overflow { limit: 10 }));
    }
}
