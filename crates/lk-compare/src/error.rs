//! Comparison errors.

use lk_engine::EngineError;
use thiserror::Error;

use crate::timing::Phase;

/// Fatal errors of a comparison run. Any of these ends the run; instances
/// are still torn down.
#[derive(Debug, Error)]
pub enum CompareError {
    #[error("no engine binaries given; the version must match the replay")]
    NoBinaries,

    #[error("failed to read replay info: {source}")]
    Replay {
        #[source]
        source: EngineError,
    },

    #[error("failed to launch {binary}: {source}")]
    Launch {
        binary: String,
        #[source]
        source: EngineError,
    },

    #[error("{instance} failed during {phase}: {source}")]
    Protocol {
        instance: String,
        phase: Phase,
        #[source]
        source: EngineError,
    },

    #[error("failed to diff observations: {0}")]
    Diff(#[from] serde_json::Error),

    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

/// One instance that could not be shut down cleanly.
#[derive(Debug, Error)]
#[error("{instance}: {action} failed: {source}")]
pub struct TeardownFailure {
    pub instance: String,
    pub action: &'static str,
    #[source]
    pub source: EngineError,
}

/// Outcome of tearing down every instance.
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Instances whose engine was released by this teardown.
    pub released: usize,
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
