//! Test results and their reduction into summaries
//!
//! [`TestResult`] is what a workload reports back through the callback
//! surface. [`GroupSummary`] and [`PlanSummary`] fold those results into the
//! counts printed at the end of a run.

pub mod aggregator;

pub use aggregator::ResultAggregator;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of one dispatched test, as reported by its workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub name: String,
    pub executed: bool,
    pub is_success: bool,
    pub is_failure: bool,
    pub message: String,
    pub stack_trace: String,
    pub elapsed_seconds: f64,
    pub assert_count: u32,
}

impl TestResult {
    /// Successful run
    pub fn success(name: impl Into<String>, elapsed_seconds: f64) -> Self {
        Self {
            name: name.into(),
            executed: true,
            is_success: true,
            is_failure: false,
            message: String::new(),
            stack_trace: String::new(),
            elapsed_seconds,
            assert_count: 0,
        }
    }

    /// Run that executed and failed
    pub fn failure(
        name: impl Into<String>,
        message: impl Into<String>,
        stack_trace: impl Into<String>,
        elapsed_seconds: f64,
    ) -> Self {
        Self {
            name: name.into(),
            executed: true,
            is_success: false,
            is_failure: true,
            message: message.into(),
            stack_trace: stack_trace.into(),
            elapsed_seconds,
            assert_count: 0,
        }
    }

    /// Test that never got to run
    pub fn not_executed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executed: false,
            is_success: false,
            is_failure: false,
            message: message.into(),
            stack_trace: String::new(),
            elapsed_seconds: 0.0,
            assert_count: 0,
        }
    }

    pub fn with_assert_count(mut self, assert_count: u32) -> Self {
        self.assert_count = assert_count;
        self
    }

    pub fn status(&self) -> ResultStatus {
        if self.is_success {
            ResultStatus::Success
        } else if self.is_failure {
            ResultStatus::Failure
        } else if !self.executed {
            ResultStatus::NotExecuted
        } else {
            ResultStatus::Unknown
        }
    }
}

/// Display classification of a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    Success,
    Failure,
    NotExecuted,
    Unknown,
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResultStatus::Success => "SUCCESS",
            ResultStatus::Failure => "FAILURE",
            ResultStatus::NotExecuted => "NOT EXECUTED",
            ResultStatus::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

/// Counts for one group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub group: String,
    pub total: usize,
    pub executed: usize,
    pub failed: usize,
    pub succeeded: usize,
    /// Longest single test time in the group (seconds)
    pub biggest_time: f64,
    pub slowest_test: Option<String>,
}

impl GroupSummary {
    pub fn from_results(group: impl Into<String>, results: &[TestResult]) -> Self {
        let mut summary = Self {
            group: group.into(),
            total: results.len(),
            ..Default::default()
        };

        for result in results {
            if result.executed {
                summary.executed += 1;
            }
            if result.is_failure {
                summary.failed += 1;
            }
            if result.is_success {
                summary.succeeded += 1;
            }
            if result.elapsed_seconds > summary.biggest_time {
                summary.biggest_time = result.elapsed_seconds;
                summary.slowest_test = Some(result.name.clone());
            }
        }

        summary
    }

    /// Whole-number success rate; 0 for an empty group
    pub fn success_percent(&self) -> usize {
        success_percent(self.succeeded, self.total)
    }
}

/// Totals across every group of a plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub groups: usize,
    pub total: usize,
    pub executed: usize,
    pub failed: usize,
    pub succeeded: usize,
    /// Sum of per-group maxima; groups run one after another
    pub biggest_time: f64,
    pub slowest_test: Option<String>,
    #[serde(skip)]
    slowest_time: f64,
}

impl PlanSummary {
    pub fn add(&mut self, group: &GroupSummary) {
        self.groups += 1;
        self.total += group.total;
        self.executed += group.executed;
        self.failed += group.failed;
        self.succeeded += group.succeeded;
        self.biggest_time += group.biggest_time;

        if group.biggest_time > self.slowest_time {
            self.slowest_time = group.biggest_time;
            self.slowest_test = group
                .slowest_test
                .as_ref()
                .map(|test| format!("{}/{}", group.group, test));
        }
    }

    pub fn success_percent(&self) -> usize {
        success_percent(self.succeeded, self.total)
    }
}

fn success_percent(succeeded: usize, total: usize) -> usize {
    if total > 0 {
        100 * succeeded / total
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results() -> Vec<TestResult> {
        vec![
            TestResult::success("a", 1.5),
            TestResult::failure("b", "assert failed", "at b.rs:10", 4.0),
            TestResult::not_executed("c", "could not spawn"),
        ]
    }

    #[test]
    fn test_status_labels() {
        let r = results();
        assert_eq!(r[0].status(), ResultStatus::Success);
        assert_eq!(r[1].status(), ResultStatus::Failure);
        assert_eq!(r[2].status(), ResultStatus::NotExecuted);
        assert_eq!(r[2].status().to_string(), "NOT EXECUTED");

        let mut odd = TestResult::success("d", 0.0);
        odd.is_success = false;
        assert_eq!(odd.status(), ResultStatus::Unknown);
    }

    #[test]
    fn test_group_summary_counts() {
        let summary = GroupSummary::from_results("G1", &results());
        assert_eq!(summary.total, 3);
        assert_eq!(summary.executed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.success_percent(), 33);
        assert_eq!(summary.biggest_time, 4.0);
        assert_eq!(summary.slowest_test.as_deref(), Some("b"));
    }

    #[test]
    fn test_empty_group_summary() {
        let summary = GroupSummary::from_results("empty", &[]);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.success_percent(), 0);
        assert!(summary.slowest_test.is_none());
    }

    #[test]
    fn test_plan_summary_accumulates() {
        let mut plan = PlanSummary::default();
        plan.add(&GroupSummary::from_results("G1", &results()));
        plan.add(&GroupSummary::from_results("G2", &[TestResult::success("x", 9.0)]));

        assert_eq!(plan.groups, 2);
        assert_eq!(plan.total, 4);
        assert_eq!(plan.succeeded, 2);
        assert_eq!(plan.success_percent(), 50);
        assert_eq!(plan.biggest_time, 13.0);
        assert_eq!(plan.slowest_test.as_deref(), Some("G2/x"));
    }

    #[test]
    fn test_json_shape_uses_wire_names() {
        let json = serde_json::to_value(TestResult::success("a", 1.0).with_assert_count(3)).unwrap();
        assert_eq!(json["isSuccess"], true);
        assert_eq!(json["elapsedSeconds"], 1.0);
        assert_eq!(json["assertCount"], 3);
        assert_eq!(json["stackTrace"], "");
    }
}
