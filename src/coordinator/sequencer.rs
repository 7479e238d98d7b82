//! Sequencer: runs a plan's groups one after another

use super::GroupCoordinator;
use crate::config::{Group, LauncherSettings, ParameterPolicy};
use crate::distributed::Dispatcher;
use crate::stats::{GroupSummary, PlanSummary, TestResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Outcome of one group
#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub summary: GroupSummary,
    pub results: Vec<TestResult>,
}

/// Outcome of a whole plan
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub groups: Vec<GroupReport>,
    pub overall: PlanSummary,
    pub started_at: DateTime<Utc>,
    /// Launcher wall time
    pub elapsed_seconds: f64,
}

pub struct Sequencer {
    settings: Arc<LauncherSettings>,
    policy: Arc<ParameterPolicy>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl Sequencer {
    pub fn new(
        settings: Arc<LauncherSettings>,
        policy: Arc<ParameterPolicy>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            settings,
            policy,
            dispatcher,
        }
    }

    /// Run every group in order; a failing group never stops the rest
    pub fn run(&self, groups: &[Group]) -> PlanReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut report = PlanReport {
            groups: Vec::with_capacity(groups.len()),
            overall: PlanSummary::default(),
            started_at,
            elapsed_seconds: 0.0,
        };

        for (index, group) in groups.iter().enumerate() {
            info!("Running group {} ({}/{})", group.name, index + 1, groups.len());

            let mut coordinator = GroupCoordinator::new(
                group.clone(),
                self.settings.clone(),
                self.policy.clone(),
                self.dispatcher.clone(),
            );

            if let Err(e) = coordinator.start() {
                error!(group = %group.name, "Failed to start group: {:#}", e);
            }
            if let Err(e) = coordinator.join() {
                error!(group = %group.name, "Group ended with an error: {:#}", e);
            }

            let results = coordinator.results();
            let summary = GroupSummary::from_results(group.name.clone(), &results);
            report.overall.add(&summary);
            report.groups.push(GroupReport { summary, results });
        }

        report.elapsed_seconds = start.elapsed().as_secs_f64();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::group::tests::{group, settings, Behavior, MockDispatcher};

    #[test]
    fn test_runs_groups_in_order_and_totals() {
        let mock = MockDispatcher::default()
            .with("b", Behavior::Report(TestResult::failure("b", "bad", "", 2.0)))
            .with("z", Behavior::Unreachable);
        let dispatcher = Arc::new(mock);
        let sequencer = Sequencer::new(settings(), Arc::new(ParameterPolicy::default()), dispatcher.clone());

        let groups = vec![
            group("G1", &["a", "b"]),
            group("empty", &[]),
            group("G2", &["y", "z"]),
        ];
        let report = sequencer.run(&groups);

        let names: Vec<&str> = report.groups.iter().map(|g| g.summary.group.as_str()).collect();
        assert_eq!(names, vec!["G1", "empty", "G2"]);
        assert_eq!(*dispatcher.dispatched.lock().unwrap(), vec!["a", "b", "y"]);

        assert_eq!(report.overall.groups, 3);
        assert_eq!(report.overall.total, 3);
        assert_eq!(report.overall.failed, 1);
        assert_eq!(report.overall.succeeded, 2);
        assert_eq!(report.overall.slowest_test.as_deref(), Some("G1/b"));
        assert!(report.groups[1].results.is_empty());
        assert!(report.elapsed_seconds > 0.0);
    }
}
