//! Error types for the flow tester
//!
//! The taxonomy separates fatal run conditions (the action ceiling) from
//! configuration and control-surface errors that reject a single command.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the flow tester
#[derive(Error, Debug)]
pub enum Error {
    // === Daemon/Connection Errors ===
    #[error("Daemon not running. Run any command to autospawn it, or start one with 'flow-test daemon'")]
    DaemonNotRunning,

    #[error("Failed to spawn daemon: timed out waiting for socket after {0} seconds")]
    DaemonSpawnTimeout(u64),

    #[error("Failed to connect to daemon: {0}")]
    DaemonConnectionFailed(#[source] io::Error),

    #[error("Daemon communication error: {0}")]
    DaemonCommunication(String),

    // === Registration / Configuration Errors ===
    #[error("Unknown event category '{0}'. Expected one of: setup, cleanup, recv, stub, send")]
    UnknownEvent(String),

    #[error("Malformed '{kind}' action: {reason}")]
    MalformedAction { kind: String, reason: String },

    #[error("Unexpected value type '{0}'")]
    UnexpectedValueType(String),

    #[error("Test case '{test_id}' not found in suite '{suite_id}'")]
    TestCaseNotFound { suite_id: String, test_id: String },

    #[error("Invalid test selector: {0}")]
    InvalidSelector(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === Action Execution Errors ===
    #[error("Unknown action kind '{0}'")]
    UnknownActionKind(String),

    #[error("Action limit exceeded: {0} actions dispatched")]
    ActionLimitExceeded(usize),

    #[error("Node '{0}' not found in the graph")]
    NodeNotFound(String),

    #[error("Evaluation error: {0}")]
    Eval(String),

    #[error("Addon '{name}' failed: {reason}")]
    Addon { name: String, reason: String },

    // === Run Errors ===
    #[error("Test run failed during {phase}: {reason}")]
    RunFailed { phase: String, reason: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a malformed-action error
    pub fn malformed(kind: &str, reason: impl Into<String>) -> Self {
        Self::MalformedAction {
            kind: kind.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a run-failed error for an orchestrator phase
    pub fn run_failed(phase: &str, reason: impl std::fmt::Display) -> Self {
        Self::RunFailed {
            phase: phase.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for conditions that abort the whole run rather than a single
    /// action
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ActionLimitExceeded(_))
    }
}

/// IPC-serializable error for daemon responses
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IpcError {
    pub code: String,
    pub message: String,
}

impl From<&Error> for IpcError {
    fn from(e: &Error) -> Self {
        let code = match e {
            Error::DaemonNotRunning => "DAEMON_NOT_RUNNING",
            Error::UnknownEvent(_) => "UNKNOWN_EVENT",
            Error::MalformedAction { .. } => "MALFORMED_ACTION",
            Error::UnexpectedValueType(_) => "UNEXPECTED_VALUE_TYPE",
            Error::TestCaseNotFound { .. } => "TEST_CASE_NOT_FOUND",
            Error::InvalidSelector(_) => "INVALID_SELECTOR",
            Error::UnknownActionKind(_) => "UNKNOWN_ACTION_KIND",
            Error::ActionLimitExceeded(_) => "ACTION_LIMIT_EXCEEDED",
            Error::NodeNotFound(_) => "NODE_NOT_FOUND",
            Error::Eval(_) => "EVAL_ERROR",
            Error::Addon { .. } => "ADDON_ERROR",
            Error::RunFailed { .. } => "RUN_FAILED",
            Error::Config(_) | Error::ConfigParse(_) => "CONFIG_ERROR",
            _ => "INTERNAL_ERROR",
        }
        .to_string();

        Self {
            code,
            message: e.to_string(),
        }
    }
}

impl From<IpcError> for Error {
    fn from(e: IpcError) -> Self {
        // Map IPC errors back to our error types where possible
        match e.code.as_str() {
            "UNKNOWN_EVENT" => Error::UnknownEvent(e.message),
            "UNEXPECTED_VALUE_TYPE" => Error::UnexpectedValueType(e.message),
            "UNKNOWN_ACTION_KIND" => Error::UnknownActionKind(e.message),
            "CONFIG_ERROR" => Error::Config(e.message),
            _ => Error::DaemonCommunication(e.message),
        }
    }
}
