//! Engine side of lockstep comparison.
//!
//! - `observation`: the state snapshot an engine returns for `observe`
//! - `protocol`: JSON-line requests/responses spoken over the engine's stdio
//! - `controller`: the launcher / control-channel traits the harness drives
//! - `subprocess`: engines as child processes
//! - `replay`: replay files, version extraction, replay lookup
//! - `sim`, `worker`: the reference engine run by `lk-engine-worker`

pub mod controller;
pub mod error;
pub mod observation;
pub mod protocol;
pub mod replay;
pub mod sim;
pub mod subprocess;
pub mod worker;

pub use controller::{EngineController, EngineLauncher, VersionSpec};
pub use error::EngineError;
pub use observation::ResponseObservation;
pub use protocol::{InterfaceOptions, RequestStartReplay};
pub use replay::{ReplayInfo, ReplayStore, ReplayVersion, replay_version};
pub use subprocess::{ProcessRegistry, SubprocessEngine, SubprocessLauncher};
