//! Engine handle traits.
//!
//! The comparison core only ever talks to engines through these two traits,
//! so tests can substitute in-process engines for real processes.

use std::fmt;

use crate::error::EngineError;
use crate::observation::ResponseObservation;
use crate::protocol::RequestStartReplay;
use crate::replay::{ReplayInfo, ReplayVersion};

/// A replay version bound to the binary that should run it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSpec {
    pub version: ReplayVersion,
    pub binary: String,
}

impl VersionSpec {
    pub fn new(version: ReplayVersion, binary: impl Into<String>) -> Self {
        Self {
            version,
            binary: binary.into(),
        }
    }

    /// One spec per binary, all sharing the replay's version.
    pub fn for_binaries(version: &ReplayVersion, binaries: &[String]) -> Vec<Self> {
        binaries
            .iter()
            .map(|b| Self::new(version.clone(), b.clone()))
            .collect()
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (build {})", self.binary, self.version.build)
    }
}

/// Control channel of one running engine. All calls block until the engine
/// answers; one request is in flight at a time.
pub trait EngineController {
    fn replay_info(&mut self, replay_data: &[u8]) -> Result<ReplayInfo, EngineError>;
    fn start_replay(&mut self, request: &RequestStartReplay) -> Result<(), EngineError>;
    fn step(&mut self, count: u32) -> Result<(), EngineError>;
    fn observe(&mut self) -> Result<ResponseObservation, EngineError>;
    /// Ask the engine to shut down gracefully.
    fn quit(&mut self) -> Result<(), EngineError>;
    /// Release the process and channel. Called exactly once, after `quit`.
    fn close(self) -> Result<(), EngineError>;
}

/// Starts engines for a given version.
pub trait EngineLauncher {
    type Engine: EngineController;

    fn launch(&self, spec: &VersionSpec) -> Result<Self::Engine, EngineError>;
}
