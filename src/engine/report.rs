//! Result aggregation and real-time notifications
//!
//! The check ledger tracks expected vs. observed validation outcomes for
//! the running test case; the notifier fans individual outcomes, log
//! lines, and run summaries out to subscribers on a channel separate from
//! the request/response surface.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Outcome of one check-performing action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub index: usize,
    pub suite_id: String,
    pub test_id: String,
    pub result: bool,
}

/// What happened when a check was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Recorded; `complete` is true when this was the last expected check
    Recorded { complete: bool },
    /// Dropped: the expected total was already reached
    Saturated,
}

/// Expected vs. observed checks for one run
#[derive(Debug, Default)]
pub struct CheckLedger {
    expected: usize,
    success: Vec<CheckResult>,
    fail: Vec<CheckResult>,
}

impl CheckLedger {
    /// Reset for a new run with the given expected-check total
    pub fn reset(&mut self, expected: usize) {
        self.expected = expected;
        self.success.clear();
        self.fail.clear();
    }

    /// Record one outcome; refuses to grow past the expected total
    pub fn record(&mut self, check: CheckResult) -> RecordOutcome {
        if self.recorded() >= self.expected {
            return RecordOutcome::Saturated;
        }
        if check.result {
            self.success.push(check);
        } else {
            self.fail.push(check);
        }
        RecordOutcome::Recorded {
            complete: self.is_complete(),
        }
    }

    pub fn recorded(&self) -> usize {
        self.success.len() + self.fail.len()
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Completion condition: every expected check has an outcome
    pub fn is_complete(&self) -> bool {
        self.recorded() >= self.expected
    }

    /// Snapshot the tallies into a run result
    pub fn snapshot(&self, aborted: bool) -> RunResult {
        RunResult {
            expected_checks: self.expected,
            success: self.success.clone(),
            fail: self.fail.clone(),
            aborted,
        }
    }
}

/// Final result document for one test-case run
///
/// `all()` is the count of outcomes actually recorded by report time;
/// a timed-out run reports what really happened, never a stale estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub expected_checks: usize,
    pub success: Vec<CheckResult>,
    pub fail: Vec<CheckResult>,
    /// True when the run ended via the action-ceiling overflow path
    pub aborted: bool,
}

impl RunResult {
    pub fn all(&self) -> usize {
        self.success.len() + self.fail.len()
    }

    pub fn success_count(&self) -> usize {
        self.success.len()
    }

    pub fn fail_count(&self) -> usize {
        self.fail.len()
    }

    pub fn passed(&self) -> bool {
        !self.aborted && self.fail.is_empty() && self.all() == self.expected_checks
    }
}

/// Real-time progress pushed to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// A diagnostic log line from a `log` or `function` action
    Log { text: String },
    /// A node's interactive control was activated
    Click { node: String },
    /// One check outcome
    Check {
        index: usize,
        suite_id: String,
        test_id: String,
        result: bool,
    },
    /// The action ceiling was reached; the run is aborting
    Overflow { limit: usize },
    /// A full test-case run finished
    RunFinished {
        suite_id: String,
        test_id: String,
        all: usize,
        success: usize,
        fail: usize,
        aborted: bool,
    },
}

/// Broadcast fan-out for notifications
///
/// Sending never fails; with no subscribers the notification is dropped.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Default for Notifier {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, notification: Notification) {
        tracing::debug!(?notification, "notify");
        let _ = self.tx.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(index: usize, result: bool) -> CheckResult {
        CheckResult {
            index,
            suite_id: "s".to_string(),
            test_id: "t".to_string(),
            result,
        }
    }

    #[test]
    fn ledger_completes_at_expected_total() {
        let mut ledger = CheckLedger::default();
        ledger.reset(2);
        assert!(!ledger.is_complete());

        assert_eq!(
            ledger.record(check(0, true)),
            RecordOutcome::Recorded { complete: false }
        );
        assert_eq!(
            ledger.record(check(1, false)),
            RecordOutcome::Recorded { complete: true }
        );

        let result = ledger.snapshot(false);
        assert_eq!(result.all(), 2);
        assert_eq!(result.success_count(), 1);
        assert_eq!(result.fail_count(), 1);
        assert!(!result.passed());
    }

    #[test]
    fn ledger_saturates_past_expected() {
        let mut ledger = CheckLedger::default();
        ledger.reset(1);
        ledger.record(check(0, true));
        assert_eq!(ledger.record(check(1, true)), RecordOutcome::Saturated);
        assert_eq!(ledger.recorded(), 1);
    }

    #[test]
    fn reset_clears_previous_run() {
        let mut ledger = CheckLedger::default();
        ledger.reset(1);
        ledger.record(check(0, false));
        ledger.reset(3);
        assert_eq!(ledger.recorded(), 0);
        assert_eq!(ledger.expected(), 3);
    }

    #[test]
    fn zero_expected_is_immediately_complete() {
        let mut ledger = CheckLedger::default();
        ledger.reset(0);
        assert!(ledger.is_complete());
    }

    #[tokio::test]
    async fn notifier_delivers_to_subscribers() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();
        notifier.publish(Notification::Log {
            text: "hi".to_string(),
        });
        match rx.recv().await.unwrap() {
            Notification::Log { text } => assert_eq!(text, "hi"),
            other => panic!("unexpected notification {:?}", other),
        }
    }
}
