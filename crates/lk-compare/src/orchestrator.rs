//! Engine instance lifecycle: launch, start the replay, tear down.

use lk_engine::{
    EngineController, EngineError, EngineLauncher, ReplayInfo, RequestStartReplay, VersionSpec,
};
use tracing::{debug, info, warn};

use crate::error::{CompareError, TeardownFailure, TeardownReport};
use crate::timing::{Phase, Stopwatch};

/// One engine under comparison. Index 0 of a run is the reference.
#[derive(Debug)]
pub struct Instance<E> {
    pub label: String,
    pub spec: VersionSpec,
    pub stopwatch: Stopwatch,
    engine: Option<E>,
}

impl<E: EngineController> Instance<E> {
    pub fn new(spec: VersionSpec, engine: E, stopwatch: Stopwatch) -> Self {
        Self {
            label: spec.to_string(),
            spec,
            stopwatch,
            engine: Some(engine),
        }
    }

    /// Run one control call, timed under `phase`. Errors carry the
    /// instance label and phase.
    pub fn call<T>(
        &mut self,
        phase: Phase,
        f: impl FnOnce(&mut E) -> Result<T, EngineError>,
    ) -> Result<T, CompareError> {
        debug!(instance = %self.label, %phase, "call");
        let result = match self.engine.as_mut() {
            Some(engine) => {
                let _timer = self.stopwatch.measure(phase);
                f(engine)
            }
            None => Err(EngineError::WorkerExited),
        };
        result.map_err(|source| CompareError::Protocol {
            instance: self.label.clone(),
            phase,
            source,
        })
    }

    /// Quit and close the engine. A second call does nothing.
    fn shut_down(&mut self) -> Option<Vec<TeardownFailure>> {
        let mut engine = self.engine.take()?;
        let mut failures = Vec::new();
        let mut fail = |action: &'static str, source: EngineError| {
            warn!(instance = %self.label, action, error = %source, "teardown failed");
            failures.push(TeardownFailure {
                instance: self.label.clone(),
                action,
                source,
            });
        };
        if let Err(e) = engine.quit() {
            fail("quit", e);
        }
        if let Err(e) = engine.close() {
            fail("close", e);
        }
        Some(failures)
    }
}

/// Starts, initializes and tears down instances through a launcher.
#[derive(Debug)]
pub struct Orchestrator<L> {
    launcher: L,
}

impl<L: EngineLauncher> Orchestrator<L> {
    pub fn new(launcher: L) -> Self {
        Self { launcher }
    }

    /// Launch one instance per spec, in order, into `instances`. Stops at the
    /// first failure; instances already launched stay in the vector.
    pub fn launch(
        &self,
        versions: &[VersionSpec],
        instances: &mut Vec<Instance<L::Engine>>,
    ) -> Result<(), CompareError> {
        for spec in versions {
            info!(binary = %spec.binary, build = spec.version.build, "launching engine");
            let mut stopwatch = Stopwatch::new();
            let launched = {
                let _timer = stopwatch.measure(Phase::Launch);
                self.launcher.launch(spec)
            };
            let engine = launched.map_err(|source| CompareError::Launch {
                binary: spec.binary.clone(),
                source,
            })?;
            instances.push(Instance::new(spec.clone(), engine, stopwatch));
        }
        Ok(())
    }

    /// Metadata of the replay, as seen by the reference instance.
    pub fn replay_info(
        &self,
        instances: &mut [Instance<L::Engine>],
        replay_data: &[u8],
    ) -> Result<ReplayInfo, CompareError> {
        let reference = instances.first_mut().ok_or(CompareError::NoBinaries)?;
        let info = match reference.engine.as_mut() {
            Some(engine) => engine.replay_info(replay_data),
            None => Err(EngineError::WorkerExited),
        };
        info.map_err(|source| CompareError::Replay { source })
    }

    /// Send the same start request to every instance.
    pub fn initialize(
        &self,
        instances: &mut [Instance<L::Engine>],
        request: &RequestStartReplay,
    ) -> Result<(), CompareError> {
        for instance in instances.iter_mut() {
            instance.call(Phase::StartReplay, |e| e.start_replay(request))?;
        }
        info!(instances = instances.len(), "replay started");
        Ok(())
    }

    /// Quit and close every instance, in order, continuing past failures.
    pub fn teardown(&self, instances: &mut [Instance<L::Engine>]) -> TeardownReport {
        let mut report = TeardownReport::default();
        for instance in instances.iter_mut() {
            if let Some(failures) = instance.shut_down() {
                report.released += 1;
                report.failures.extend(failures);
            }
        }
        info!(
            released = report.released,
            failures = report.failures.len(),
            "instances torn down"
        );
        report
    }
}
