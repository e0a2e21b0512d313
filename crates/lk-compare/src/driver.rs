//! The lockstep loop.
//!
//! Every iteration steps all instances, then observes all instances, then
//! (optionally) diffs every peer against the reference. Cancellation is only
//! honoured between iterations so that every recorded tick has a complete
//! set of observations.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lk_engine::{EngineController, ResponseObservation};
use serde::Serialize;
use strum::Display;
use tracing::{debug, info};

use crate::aggregate::DivergenceAggregator;
use crate::diff::{FieldComparator, ImageDifferencer, compute_diff};
use crate::error::CompareError;
use crate::normalize::clear_non_deterministic_fields;
use crate::orchestrator::Instance;
use crate::timing::Phase;

/// Loop parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoopConfig {
    /// Normalize and diff observations every tick.
    pub diff: bool,
    /// Maximum printed length of a diff value; 0 prints values whole.
    pub truncate: usize,
    /// Game loops advanced per step.
    pub step_mul: u32,
    /// Maximum number of iterations.
    pub count: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            diff: false,
            truncate: 0,
            step_mul: 8,
            count: 100_000,
        }
    }
}

/// Shared flag asking the loop to stop at the next tick boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The reference reported a game result.
    GameEnded,
    /// `count` iterations ran.
    BudgetExhausted,
    /// The cancel token was set.
    Interrupted,
}

/// How and when the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoopOutcome {
    pub termination: Termination,
    pub iterations: u64,
    /// Game loop of the last reference observation.
    pub last_game_loop: Option<u32>,
}

pub struct LockstepDriver {
    config: LoopConfig,
    cancel: CancelToken,
    comparators: Vec<Box<dyn FieldComparator>>,
}

impl LockstepDriver {
    /// Driver with the image comparator installed.
    pub fn new(config: LoopConfig, cancel: CancelToken) -> Self {
        Self {
            config,
            cancel,
            comparators: vec![Box::new(ImageDifferencer::default())],
        }
    }

    pub fn with_comparator(mut self, comparator: Box<dyn FieldComparator>) -> Self {
        self.comparators.push(comparator);
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run the loop until the game ends, the budget is spent or the token is
    /// cancelled. Diff reports are written to `out`.
    pub fn run<E: EngineController, W: Write>(
        &self,
        instances: &mut [Instance<E>],
        aggregator: &mut DivergenceAggregator,
        out: &mut W,
    ) -> Result<LoopOutcome, CompareError> {
        let mut outcome = LoopOutcome {
            termination: Termination::BudgetExhausted,
            iterations: 0,
            last_game_loop: None,
        };

        while outcome.iterations < self.config.count {
            if self.cancel.is_cancelled() {
                info!(iterations = outcome.iterations, "interrupted");
                outcome.termination = Termination::Interrupted;
                return Ok(outcome);
            }

            for instance in instances.iter_mut() {
                instance.call(Phase::Step, |e| e.step(self.config.step_mul))?;
            }
            let mut observations = Vec::with_capacity(instances.len());
            for instance in instances.iter_mut() {
                observations.push(instance.call(Phase::Observe, |e| e.observe())?);
            }
            outcome.iterations += 1;

            let Some(reference) = observations.first() else {
                break;
            };
            let game_loop = reference.game_loop();
            let game_ended = reference.game_ended();
            outcome.last_game_loop = Some(game_loop);
            debug!(game_loop, "observed");

            if self.config.diff {
                self.compare(instances, &mut observations, aggregator, out)?;
            }

            if game_ended {
                info!(game_loop, "game ended");
                outcome.termination = Termination::GameEnded;
                return Ok(outcome);
            }
        }

        Ok(outcome)
    }

    fn compare<E, W: Write>(
        &self,
        instances: &[Instance<E>],
        observations: &mut [ResponseObservation],
        aggregator: &mut DivergenceAggregator,
        out: &mut W,
    ) -> Result<(), CompareError> {
        for obs in observations.iter_mut() {
            clear_non_deterministic_fields(obs);
        }
        let Some((reference, peers)) = observations.split_first() else {
            return Ok(());
        };

        let mut diffs = Vec::with_capacity(peers.len());
        for peer in peers {
            diffs.push(compute_diff(reference, peer)?);
        }
        if diffs.iter().all(|d| d.is_empty()) {
            return Ok(());
        }

        let comparators: Vec<&dyn FieldComparator> =
            self.comparators.iter().map(|c| c.as_ref()).collect();
        let banner = format!(" Diff on step: {} ", reference.game_loop());
        writeln!(out, "{:-^80}", banner)?;
        for (i, diff) in diffs.iter().enumerate() {
            let index = i + 1;
            if diff.is_empty() {
                continue;
            }
            let label = instances.get(index).map_or("?", |inst| inst.label.as_str());
            writeln!(out, "{}", label)?;
            writeln!(out, "{}", diff.report(&comparators, self.config.truncate))?;
            aggregator.record(index, diff);
        }
        Ok(())
    }
}
