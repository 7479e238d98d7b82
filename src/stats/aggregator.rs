//! Result aggregation for one dispatch session
//!
//! Collects the results workloads report through the callback surface and
//! fires a one-shot completion signal once every launched test has reported.
//!
//! # Completion
//!
//! The signal is armed by [`ResultAggregator::seal`], which the coordinator
//! calls after its dispatch loop. Until then the launched set is still
//! growing, so an early report from a fast test cannot complete the group.
//! After sealing, whichever event makes received equal launched fires the
//! signal, exactly once.

use super::TestResult;
use crate::rendezvous::RendezvousRegistry;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// What happened to a reported result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Appended to the result list
    Recorded,
    /// The test already reported; ignored
    Duplicate,
    /// The test was never launched in this session; ignored
    Unexpected,
}

/// Thread-safe result collection with a one-shot completion signal
#[derive(Debug)]
pub struct ResultAggregator {
    group: String,
    registry: Arc<RendezvousRegistry>,
    state: Mutex<AggregatorState>,
}

#[derive(Debug)]
struct AggregatorState {
    launched: HashSet<String>,
    reported: HashSet<String>,
    results: Vec<TestResult>,
    sealed: bool,
    completion_tx: Option<oneshot::Sender<()>>,
    completion_rx: Option<oneshot::Receiver<()>>,
}

impl ResultAggregator {
    pub fn new(group: impl Into<String>, registry: Arc<RendezvousRegistry>) -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            group: group.into(),
            registry,
            state: Mutex::new(AggregatorState {
                launched: HashSet::new(),
                reported: HashSet::new(),
                results: Vec::new(),
                sealed: false,
                completion_tx: Some(tx),
                completion_rx: Some(rx),
            }),
        }
    }

    /// Take the completion receiver; only the first caller gets it
    pub fn completion(&self) -> Option<oneshot::Receiver<()>> {
        self.lock().completion_rx.take()
    }

    /// Count a test as launched before its dispatch request goes out
    ///
    /// Counting first means a result that races ahead of the dispatch reply
    /// is still recognized. Returns false if the test was already counted.
    pub fn begin_dispatch(&self, test_name: &str) -> bool {
        self.lock().launched.insert(test_name.to_string())
    }

    /// Undo [`ResultAggregator::begin_dispatch`] after a failed dispatch
    ///
    /// A test that already reported stays counted. Returns true if the
    /// launched count went down.
    pub fn dispatch_failed(&self, test_name: &str) -> bool {
        let mut state = self.lock();
        if state.reported.contains(test_name) {
            warn!(
                group = %self.group,
                test = test_name,
                "Dispatch reported failure but the test already delivered a result; keeping it"
            );
            return false;
        }
        let removed = state.launched.remove(test_name);
        if removed {
            self.check_completion(&mut state);
        }
        removed
    }

    /// Close the launched set and arm the completion signal
    ///
    /// Returns true if every launched test has already reported.
    pub fn seal(&self) -> bool {
        let mut state = self.lock();
        state.sealed = true;
        self.check_completion(&mut state);
        state.completion_tx.is_none()
    }

    /// Record a test's result and abandon the barriers it was expected to enter
    pub fn notify_result(&self, test_name: &str, result: TestResult) -> NotifyOutcome {
        debug!(group = %self.group, test = test_name, "NotifyResult called");

        let passed = result.is_success;
        let outcome = {
            let mut state = self.lock();
            if !state.launched.contains(test_name) {
                NotifyOutcome::Unexpected
            } else if !state.reported.insert(test_name.to_string()) {
                NotifyOutcome::Duplicate
            } else {
                state.results.push(result);
                self.check_completion(&mut state);
                NotifyOutcome::Recorded
            }
        };

        // A test that reported will not enter any further barrier
        let abandoned = self.registry.abandon_barriers_of(test_name);
        if !abandoned.is_empty() {
            debug!(group = %self.group, test = test_name, barriers = ?abandoned, "Abandoned barriers of reporting test");
        }

        match outcome {
            NotifyOutcome::Recorded => info!(
                "Result for group {}, test {}: {}",
                self.group,
                test_name,
                if passed { "PASS" } else { "FAIL" }
            ),
            NotifyOutcome::Duplicate => {
                warn!(group = %self.group, test = test_name, "Ignoring duplicate result")
            }
            NotifyOutcome::Unexpected => {
                warn!(group = %self.group, test = test_name, "Ignoring result for a test that was not launched")
            }
        }

        outcome
    }

    pub fn launched_count(&self) -> usize {
        self.lock().launched.len()
    }

    pub fn received_count(&self) -> usize {
        self.lock().results.len()
    }

    /// True once the completion signal has fired
    pub fn is_complete(&self) -> bool {
        self.lock().completion_tx.is_none()
    }

    /// Snapshot of every result received so far
    pub fn results(&self) -> Vec<TestResult> {
        self.lock().results.clone()
    }

    /// Launched tests that have not reported yet, sorted by name
    pub fn missing(&self) -> Vec<String> {
        let state = self.lock();
        let mut missing: Vec<String> = state
            .launched
            .difference(&state.reported)
            .cloned()
            .collect();
        missing.sort();
        missing
    }

    fn check_completion(&self, state: &mut AggregatorState) {
        if state.sealed && state.results.len() == state.launched.len() {
            if let Some(tx) = state.completion_tx.take() {
                debug!(
                    group = %self.group,
                    received = state.results.len(),
                    "All launched tests reported, waking coordinator"
                );
                let _ = tx.send(());
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, AggregatorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
