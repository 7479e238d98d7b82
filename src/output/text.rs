//! Human-readable text output

use crate::coordinator::{GroupReport, PlanReport};
use crate::stats::{ResultStatus, TestResult};
use std::io::{self, Write};

/// Print the plan report to stdout
pub fn print_report(report: &PlanReport) {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    // stdout going away mid-report is not worth failing the launcher for
    let _ = write_report(&mut out, report);
}

/// Write the plan report in text form
///
/// One block per group with every result, then the group's totals. The
/// overall block is only printed when more than one group ran.
pub fn write_report<W: Write>(out: &mut W, report: &PlanReport) -> io::Result<()> {
    for group in &report.groups {
        write_group(out, group)?;
    }

    if report.groups.len() > 1 {
        let overall = &report.overall;
        writeln!(out, "═══════════════════════════════════════════════════════════")?;
        writeln!(out, "                    OVERALL SUMMARY")?;
        writeln!(out, "═══════════════════════════════════════════════════════════")?;
        writeln!(out, "Groups: {}", overall.groups)?;
        write_totals(
            out,
            overall.total,
            overall.executed,
            overall.failed,
            overall.succeeded,
            overall.success_percent(),
        )?;
        writeln!(out, "Biggest Execution Time: {:.3}s", overall.biggest_time)?;
        if let Some(slowest) = &overall.slowest_test {
            writeln!(out, "Slowest Test: {}", slowest)?;
        }
        writeln!(out)?;
    }

    writeln!(out, "Launcher wall time: {:.3}s", report.elapsed_seconds)?;
    Ok(())
}

fn write_group<W: Write>(out: &mut W, group: &GroupReport) -> io::Result<()> {
    let summary = &group.summary;

    writeln!(out, "═══════════════════════════════════════════════════════════")?;
    writeln!(out, "Group: {}", summary.group)?;
    writeln!(out, "═══════════════════════════════════════════════════════════")?;

    if group.results.is_empty() {
        writeln!(out, "  (no results)")?;
    }
    for (index, result) in group.results.iter().enumerate() {
        write_result(out, index + 1, result)?;
    }

    writeln!(out)?;
    write_totals(
        out,
        summary.total,
        summary.executed,
        summary.failed,
        summary.succeeded,
        summary.success_percent(),
    )?;
    writeln!(out, "Biggest Execution Time: {:.3}s", summary.biggest_time)?;
    if let Some(slowest) = &summary.slowest_test {
        writeln!(out, "Slowest Test: {}", slowest)?;
    }
    writeln!(out)
}

fn write_result<W: Write>(out: &mut W, number: usize, result: &TestResult) -> io::Result<()> {
    let status = result.status();
    writeln!(out, "({}) {}", number, result.name)?;
    writeln!(out, "    Result: {}", status)?;
    writeln!(out, "    Assert Count: {}", result.assert_count)?;
    writeln!(out, "    Time: {:.3}s", result.elapsed_seconds)?;

    if status != ResultStatus::Success {
        if !result.message.is_empty() {
            writeln!(out, "    Message: {}", result.message)?;
        }
        if !result.stack_trace.is_empty() {
            writeln!(out, "    Trace:")?;
            for line in result.stack_trace.lines() {
                writeln!(out, "      {}", line)?;
            }
        }
    }
    Ok(())
}

fn write_totals<W: Write>(
    out: &mut W,
    total: usize,
    executed: usize,
    failed: usize,
    succeeded: usize,
    percent: usize,
) -> io::Result<()> {
    writeln!(out, "Total: {}", total)?;
    writeln!(out, "Executed: {}", executed)?;
    writeln!(out, "Failed: {}", failed)?;
    writeln!(out, "Success: {}", succeeded)?;
    writeln!(out, "% Success: {}", percent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{GroupSummary, PlanSummary};
    use chrono::Utc;

    fn group(name: &str, results: Vec<TestResult>) -> GroupReport {
        GroupReport {
            summary: GroupSummary::from_results(name, &results),
            results,
        }
    }

    fn render(report: &PlanReport) -> String {
        let mut buf = Vec::new();
        write_report(&mut buf, report).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn plan(groups: Vec<GroupReport>) -> PlanReport {
        let mut overall = PlanSummary::default();
        for g in &groups {
            overall.add(&g.summary);
        }
        PlanReport {
            groups,
            overall,
            started_at: Utc::now(),
            elapsed_seconds: 4.5,
        }
    }

    #[test]
    fn test_single_group_has_no_overall_block() {
        let text = render(&plan(vec![group(
            "G1",
            vec![
                TestResult::success("a", 1.0).with_assert_count(5),
                TestResult::failure("b", "expected 3", "at b:1\nat main", 2.0),
            ],
        )]));

        assert!(text.contains("Group: G1"));
        assert!(text.contains("(1) a\n    Result: SUCCESS\n    Assert Count: 5"));
        assert!(text.contains("(2) b\n    Result: FAILURE"));
        assert!(text.contains("Message: expected 3"));
        assert!(text.contains("      at main"));
        assert!(text.contains("% Success: 50"));
        assert!(text.contains("Slowest Test: b"));
        assert!(!text.contains("OVERALL SUMMARY"));
        assert!(text.contains("Launcher wall time: 4.500s"));
    }

    #[test]
    fn test_overall_block_for_several_groups() {
        let text = render(&plan(vec![
            group("G1", vec![TestResult::success("a", 1.0)]),
            group("G2", vec![TestResult::not_executed("x", "spawn failed")]),
            group("G3", vec![]),
        ]));

        assert!(text.contains("OVERALL SUMMARY"));
        assert!(text.contains("Groups: 3"));
        assert!(text.contains("Result: NOT EXECUTED"));
        assert!(text.contains("Message: spawn failed"));
        assert!(text.contains("(no results)"));
        assert!(text.contains("Slowest Test: G1/a"));
    }
}
