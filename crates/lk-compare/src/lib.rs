//! Lockstep comparison of engine builds.
//!
//! Several engine instances replay the same recording. They are stepped
//! and observed in lockstep, and every peer's observation is diffed against
//! the reference instance (index 0) once engine-assigned identifiers are
//! cleared.
//!
//! - `orchestrator`: launch, start and tear down instances
//! - `driver`: the step / observe / diff loop
//! - `interrupt`: Ctrl-C escalation, from stopping the loop to killing engines
//! - `normalize`: clear non-deterministic identifiers
//! - `diff`: structural observation diff and comparator plugins
//! - `aggregate`: divergence counters
//! - `timing`, `report`: phase timings and the final report

pub mod aggregate;
pub mod diff;
pub mod driver;
pub mod error;
pub mod interrupt;
pub mod normalize;
pub mod orchestrator;
pub mod report;
pub mod timing;

pub use aggregate::{DivergenceAggregator, DivergenceSummary};
pub use diff::{DiffResult, FieldComparator, FieldPath, ImageDifferencer, compute_diff};
pub use driver::{CancelToken, LockstepDriver, LoopConfig, LoopOutcome, Termination};
pub use error::{CompareError, TeardownFailure, TeardownReport};
pub use interrupt::{InterruptAction, Interrupter};
pub use normalize::clear_non_deterministic_fields;
pub use orchestrator::{Instance, Orchestrator};
pub use report::{ComparisonReport, InstanceTimings};
pub use timing::{Phase, Stopwatch};

use std::io::Write;

use lk_engine::{EngineLauncher, RequestStartReplay, VersionSpec};
use tracing::error;

/// Run a full comparison: launch one instance per version, print the replay
/// info, start the replay, run the lockstep loop and tear everything down.
///
/// Teardown happens exactly once on every path, including launch failures
/// and loop errors. Diff output goes to `out` as the loop runs.
pub fn run_comparison<L: EngineLauncher, W: Write>(
    launcher: L,
    versions: &[VersionSpec],
    start: &RequestStartReplay,
    driver: &LockstepDriver,
    top_paths: usize,
    out: &mut W,
) -> Result<ComparisonReport, CompareError> {
    if versions.is_empty() {
        return Err(CompareError::NoBinaries);
    }

    let orchestrator = Orchestrator::new(launcher);
    let mut aggregator =
        DivergenceAggregator::new(versions.iter().map(VersionSpec::to_string).collect());
    let mut instances = Vec::with_capacity(versions.len());

    let result = drive(
        &orchestrator,
        versions,
        start,
        driver,
        &mut instances,
        &mut aggregator,
        out,
    );
    let teardown = orchestrator.teardown(&mut instances);

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "comparison failed");
            return Err(e);
        }
    };

    Ok(ComparisonReport {
        outcome,
        divergence: driver
            .config()
            .diff
            .then(|| aggregator.report(top_paths)),
        timings: instances
            .into_iter()
            .map(|i| InstanceTimings {
                label: i.label,
                timings: i.stopwatch,
            })
            .collect(),
        teardown_failures: teardown.failures.iter().map(|f| f.to_string()).collect(),
    })
}

fn drive<L: EngineLauncher, W: Write>(
    orchestrator: &Orchestrator<L>,
    versions: &[VersionSpec],
    start: &RequestStartReplay,
    driver: &LockstepDriver,
    instances: &mut Vec<Instance<L::Engine>>,
    aggregator: &mut DivergenceAggregator,
    out: &mut W,
) -> Result<LoopOutcome, CompareError> {
    orchestrator.launch(versions, instances)?;

    let info = orchestrator.replay_info(instances, &start.replay_data)?;
    writeln!(out, "{}", "-".repeat(80))?;
    writeln!(out, "{}", info)?;
    writeln!(out, "{}", "-".repeat(80))?;

    orchestrator.initialize(instances, start)?;
    driver.run(instances, aggregator, out)
}
