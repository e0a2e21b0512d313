//! Per-instance phase timing.
//!
//! Each instance owns a [`Stopwatch`]. `measure` hands out a guard that adds
//! the elapsed wall-clock time to the phase when it is dropped, so the time
//! is recorded whether the timed call returns normally, bails out with `?`,
//! or unwinds.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoEnumIterator};

/// Phases timed for every instance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Launch,
    StartReplay,
    Step,
    Observe,
}

/// Accumulated durations for one phase, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseStats {
    pub num: u64,
    pub sum: f64,
    pub sum_sq: f64,
    pub min: f64,
    pub max: f64,
}

impl PhaseStats {
    fn add(&mut self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if self.num == 0 {
            self.min = secs;
            self.max = secs;
        } else {
            self.min = self.min.min(secs);
            self.max = self.max.max(secs);
        }
        self.num += 1;
        self.sum += secs;
        self.sum_sq += secs * secs;
    }

    pub fn avg(&self) -> f64 {
        if self.num == 0 {
            0.0
        } else {
            self.sum / self.num as f64
        }
    }

    /// Population standard deviation.
    pub fn dev(&self) -> f64 {
        if self.num == 0 {
            return 0.0;
        }
        let avg = self.avg();
        (self.sum_sq / self.num as f64 - avg * avg).max(0.0).sqrt()
    }
}

/// Phase timings of one instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stopwatch {
    phases: Vec<(Phase, PhaseStats)>,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start timing `phase`; the time is recorded when the guard drops.
    #[must_use = "the phase is timed until the guard is dropped"]
    pub fn measure(&mut self, phase: Phase) -> TimerGuard<'_> {
        TimerGuard {
            stopwatch: self,
            phase,
            start: Instant::now(),
        }
    }

    /// Add an already measured duration.
    pub fn record(&mut self, phase: Phase, elapsed: Duration) {
        match self.phases.iter_mut().find(|(p, _)| *p == phase) {
            Some((_, stats)) => stats.add(elapsed),
            None => {
                let mut stats = PhaseStats::default();
                stats.add(elapsed);
                self.phases.push((phase, stats));
            }
        }
    }

    pub fn get(&self, phase: Phase) -> Option<&PhaseStats> {
        self.phases.iter().find(|(p, _)| *p == phase).map(|(_, s)| s)
    }

    /// Phases that were timed at least once, in `Phase` order.
    pub fn phases(&self) -> impl Iterator<Item = (Phase, &PhaseStats)> {
        Phase::iter().filter_map(|p| self.get(p).map(|s| (p, s)))
    }

    /// Total time over all phases, in seconds.
    pub fn total(&self) -> f64 {
        self.phases.iter().map(|(_, s)| s.sum).sum()
    }
}

impl fmt::Display for Stopwatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.phases.is_empty() {
            return write!(f, "No timings recorded.");
        }
        writeln!(
            f,
            "{:<14} {:>10} {:>10} {:>10} {:>10} {:>10} {:>8}",
            "", "sum", "avg", "dev", "min", "max", "num"
        )?;
        for (phase, s) in self.phases() {
            writeln!(
                f,
                "{:<14} {:>10.4} {:>10.6} {:>10.6} {:>10.6} {:>10.6} {:>8}",
                phase.to_string(),
                s.sum,
                s.avg(),
                s.dev(),
                s.min,
                s.max,
                s.num
            )?;
        }
        write!(f, "{:<14} {:>10.4}", "total", self.total())
    }
}

/// Records elapsed time into its stopwatch on drop.
pub struct TimerGuard<'a> {
    stopwatch: &'a mut Stopwatch,
    phase: Phase,
    start: Instant,
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        self.stopwatch.record(self.phase, elapsed);
    }
}
