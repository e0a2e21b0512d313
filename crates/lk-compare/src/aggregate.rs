//! Divergence counters accumulated over a run.

use serde::Serialize;

use crate::diff::DiffResult;

/// Ticks on which one instance diverged from the reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceCount {
    pub instance: usize,
    pub label: String,
    pub count: u64,
}

/// Occurrences of one anonymized observation path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathCount {
    pub path: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DivergenceSummary {
    pub by_instance: Vec<InstanceCount>,
    pub by_path: Vec<PathCount>,
}

/// Counts diverging ticks per instance and discrepancies per path.
#[derive(Debug, Clone)]
pub struct DivergenceAggregator {
    labels: Vec<String>,
    ticks: Vec<u64>,
    // Insertion ordered; ties in the report keep first-seen order.
    paths: Vec<(String, u64)>,
}

impl DivergenceAggregator {
    /// One counter per instance label, index 0 being the reference.
    pub fn new(labels: Vec<String>) -> Self {
        let ticks = vec![0; labels.len()];
        Self {
            labels,
            ticks,
            paths: Vec::new(),
        }
    }

    /// Count a diff of instance `instance` against the reference. Empty
    /// diffs and unknown instances are ignored.
    pub fn record(&mut self, instance: usize, diff: &DiffResult) {
        if diff.is_empty() {
            return;
        }
        let Some(ticks) = self.ticks.get_mut(instance) else {
            return;
        };
        *ticks += 1;

        for path in diff.all_diffs() {
            let key = path.with_anonymous_array_indices().to_string();
            match self.paths.iter_mut().find(|(p, _)| *p == key) {
                Some((_, count)) => *count += 1,
                None => self.paths.push((key, 1)),
            }
        }
    }

    pub fn tick_count(&self, instance: usize) -> u64 {
        self.ticks.get(instance).copied().unwrap_or(0)
    }

    pub fn path_count(&self, path: &str) -> u64 {
        self.paths
            .iter()
            .find(|(p, _)| p == path)
            .map_or(0, |(_, c)| *c)
    }

    /// Instances and paths ranked by count, paths cut to `top_n`.
    pub fn report(&self, top_n: usize) -> DivergenceSummary {
        let mut by_instance: Vec<InstanceCount> = self
            .labels
            .iter()
            .zip(&self.ticks)
            .enumerate()
            .map(|(instance, (label, count))| InstanceCount {
                instance,
                label: label.clone(),
                count: *count,
            })
            .collect();
        by_instance.sort_by(|a, b| b.count.cmp(&a.count));

        let mut by_path: Vec<PathCount> = self
            .paths
            .iter()
            .map(|(path, count)| PathCount {
                path: path.clone(),
                count: *count,
            })
            .collect();
        by_path.sort_by(|a, b| b.count.cmp(&a.count));
        by_path.truncate(top_n);

        DivergenceSummary {
            by_instance,
            by_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{ChangeKind, Discrepancy, FieldPath};

    fn diff(paths: &[&str]) -> DiffResult {
        DiffResult::from_discrepancies(
            paths
                .iter()
                .map(|p| Discrepancy {
                    path: p.parse::<FieldPath>().unwrap(),
                    kind: ChangeKind::Changed,
                })
                .collect(),
        )
    }

    #[test]
    fn test_empty_diff_is_not_counted() {
        let mut agg = DivergenceAggregator::new(vec!["a".into(), "b".into()]);
        agg.record(1, &diff(&[]));
        assert_eq!(agg.tick_count(1), 0);
        assert!(agg.report(10).by_path.is_empty());
    }

    #[test]
    fn test_score_and_health_scenario() {
        // Peer 1 diverges on score at ticks 3 and 7, and on unit 3's health at tick 7.
        let mut agg = DivergenceAggregator::new(vec!["ref".into(), "peer".into()]);
        for tick in 0..10 {
            let d = match tick {
                3 => diff(&["score.value"]),
                7 => diff(&["score.value", "units[3].health"]),
                _ => diff(&[]),
            };
            agg.record(1, &d);
        }
        assert_eq!(agg.tick_count(0), 0);
        assert_eq!(agg.tick_count(1), 2);
        assert_eq!(agg.path_count("score.value"), 2);
        assert_eq!(agg.path_count("units[*].health"), 1);

        let summary = agg.report(100);
        assert_eq!(summary.by_instance[0].label, "peer");
        assert_eq!(summary.by_instance[0].count, 2);
        assert_eq!(
            summary.by_path,
            vec![
                PathCount { path: "score.value".into(), count: 2 },
                PathCount { path: "units[*].health".into(), count: 1 },
            ]
        );
    }

    #[test]
    fn test_score_and_health_scenario_across_two_peers() {
        let mut agg = DivergenceAggregator::new(vec!["ref".into(), "a".into(), "b".into()]);
        for tick in 0..10 {
            let (da, db) = match tick {
                3 => (diff(&["score.value"]), diff(&[])),
                7 => (diff(&["score.value"]), diff(&["units[3].health"])),
                _ => (diff(&[]), diff(&[])),
            };
            agg.record(1, &da);
            agg.record(2, &db);
        }
        assert_eq!(agg.tick_count(0), 0);
        assert_eq!(agg.tick_count(1), 2);
        assert_eq!(agg.tick_count(2), 1);

        let summary = agg.report(100);
        let ranked: Vec<(&str, u64)> = summary
            .by_instance
            .iter()
            .map(|i| (i.label.as_str(), i.count))
            .collect();
        assert_eq!(ranked, vec![("a", 2), ("b", 1), ("ref", 0)]);
        assert_eq!(
            summary.by_path,
            vec![
                PathCount { path: "score.value".into(), count: 2 },
                PathCount { path: "units[*].health".into(), count: 1 },
            ]
        );
    }

    #[test]
    fn test_index_only_paths_share_a_counter() {
        let mut agg = DivergenceAggregator::new(vec!["ref".into(), "peer".into()]);
        agg.record(1, &diff(&["units[3].health", "units[7].health"]));
        assert_eq!(agg.path_count("units[*].health"), 2);
        assert_eq!(agg.tick_count(1), 1);
    }

    #[test]
    fn test_ties_keep_first_seen_order_and_top_n() {
        let mut agg = DivergenceAggregator::new(vec!["r".into(), "a".into(), "b".into()]);
        agg.record(1, &diff(&["z"]));
        agg.record(2, &diff(&["a", "m"]));
        let summary = agg.report(2);
        let paths: Vec<&str> = summary.by_path.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths, vec!["z", "a"]);
        let labels: Vec<&str> = summary.by_instance.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["a", "b", "r"]);
    }

    #[test]
    fn test_unknown_instance_is_ignored() {
        let mut agg = DivergenceAggregator::new(vec!["r".into()]);
        agg.record(4, &diff(&["x"]));
        assert_eq!(agg.path_count("x"), 0);
    }
}
