//! End-of-run report: divergence counts and per-instance timings.

use std::fmt;

use serde::Serialize;

use crate::aggregate::DivergenceSummary;
use crate::driver::LoopOutcome;
use crate::timing::Stopwatch;

/// Timings of one instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceTimings {
    pub label: String,
    pub timings: Stopwatch,
}

/// Everything printed after a comparison run.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub outcome: LoopOutcome,
    /// Present when observations were diffed.
    pub divergence: Option<DivergenceSummary>,
    pub timings: Vec<InstanceTimings>,
    /// Instances that did not shut down cleanly.
    pub teardown_failures: Vec<String>,
}

impl ComparisonReport {
    /// True if diffing ran and found no divergence.
    pub fn converged(&self) -> bool {
        self.divergence
            .as_ref()
            .is_some_and(|d| d.by_instance.iter().all(|i| i.count == 0))
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
    }
}

fn heading(f: &mut fmt::Formatter<'_>, title: &str) -> fmt::Result {
    writeln!(f, "{:-^80}", format!(" {} ", title))
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(divergence) = &self.divergence {
            heading(f, "Diff Counts by binary")?;
            for row in &divergence.by_instance {
                writeln!(f, " {:5} {}", row.count, row.label)?;
            }
            writeln!(f)?;

            heading(f, "Diff Counts by observation path")?;
            for row in &divergence.by_path {
                writeln!(f, " {:5} {}", row.count, row.path)?;
            }
            writeln!(f)?;
        }

        heading(f, "Timings")?;
        for instance in &self.timings {
            writeln!(f, "{}", instance.label)?;
            writeln!(f, "{}", instance.timings)?;
        }

        for failure in &self.teardown_failures {
            writeln!(f, "teardown: {}", failure)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{InstanceCount, PathCount};
    use crate::driver::Termination;
    use crate::timing::Phase;
    use std::time::Duration;

    fn report(divergence: Option<DivergenceSummary>) -> ComparisonReport {
        let mut timings = Stopwatch::new();
        timings.record(Phase::Step, Duration::from_millis(3));
        ComparisonReport {
            outcome: LoopOutcome {
                termination: Termination::BudgetExhausted,
                iterations: 10,
                last_game_loop: Some(80),
            },
            divergence,
            timings: vec![InstanceTimings {
                label: "SC2_x64 (build 75689)".into(),
                timings,
            }],
            teardown_failures: vec![],
        }
    }

    #[test]
    fn test_text_report_with_divergence() {
        let text = report(Some(DivergenceSummary {
            by_instance: vec![InstanceCount {
                instance: 1,
                label: "peer".into(),
                count: 2,
            }],
            by_path: vec![PathCount {
                path: "units[*].health".into(),
                count: 12,
            }],
        }))
        .to_string();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0].len(), 80);
        assert!(lines[0].contains(" Diff Counts by binary "));
        assert!(lines[0].starts_with('-') && lines[0].ends_with('-'));
        assert_eq!(lines[1], "     2 peer");
        assert!(lines[3].contains(" Diff Counts by observation path "));
        assert_eq!(lines[4], "    12 units[*].health");
        assert!(lines[6].contains(" Timings "));
        assert_eq!(lines[7], "SC2_x64 (build 75689)");
        assert!(text.contains("step"));
    }

    #[test]
    fn test_text_report_without_diff_only_has_timings() {
        let r = report(None);
        let text = r.to_string();
        assert!(!text.contains("Diff Counts"));
        assert!(text.starts_with(&format!("{:-^80}", " Timings ")));
        assert!(!r.converged());
    }

    #[test]
    fn test_json_report() {
        let json: serde_json::Value = serde_json::from_str(&report(None).to_json()).unwrap();
        assert_eq!(json["outcome"]["termination"], "budget_exhausted");
        assert_eq!(json["outcome"]["iterations"], 10);
        assert!(json["divergence"].is_null());
        assert_eq!(json["timings"][0]["label"], "SC2_x64 (build 75689)");
    }
}
