//! CLI command definitions
//!
//! Defines the clap commands for the flow-test CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// List configured test cases
    #[command(alias = "ls")]
    List {
        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a test case: a number from 'list', or suite/test ids
    #[command(alias = "r")]
    Run {
        /// Test selector: 1-based index, or "<suite_id>/<test_id>"
        test: String,

        /// Output the run result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Reset the engine and install graph hooks
    Init,

    /// Register actions for one event category from a JSON file
    Register {
        /// Event category: setup, cleanup, recv, stub, or send
        event: String,

        /// Path to a JSON file mapping node ids to action lists
        actions: PathBuf,

        /// Suite id stamped on the registered actions
        #[arg(long, default_value = "adhoc")]
        suite: String,

        /// Test id stamped on the registered actions
        #[arg(long, default_value = "adhoc")]
        test: String,
    },

    /// Run the registered setup actions
    Setup {
        /// Cap on total dispatched actions for this run
        #[arg(long)]
        max_actions: Option<usize>,
    },

    /// Run the registered cleanup actions and report the result
    Cleanup {
        /// Output the run result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Deliver a payload to a named node
    Send {
        /// Target node id
        target: String,

        /// Payload: JSON, or a bare string
        value: String,
    },

    /// Record a diagnostic log line
    Log {
        /// Value to log: JSON, or a bare string
        value: String,
    },

    /// Write a typed value into the message or a context store
    Set {
        /// Destination as JSON, e.g. '{"type":"global","value":"counter"}'
        target: String,

        /// Source as JSON, e.g. '{"type":"num","value":42}'
        source: String,
    },

    /// Start a timed wait on the daemon
    Wait {
        /// Wait duration in milliseconds
        ms: u64,
    },

    /// Evaluate a statement sequence on the daemon
    #[command(alias = "fn")]
    Function {
        /// Code to evaluate
        code: String,
    },

    /// Stream run notifications (checks, logs, clicks) as they happen
    #[command(alias = "w")]
    Watch {
        /// Print notifications as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// View daemon logs
    Logs {
        /// Number of lines to show (default: 50)
        #[arg(long, short = 'n', default_value = "50")]
        lines: usize,
    },

    /// Stop the daemon
    Stop,

    /// [Hidden] Run in daemon mode - spawned automatically
    #[command(hide = true)]
    Daemon,
}
