//! Engines running as child processes, driven over stdin/stdout.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{MAIN_SEPARATOR, Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::controller::{EngineController, EngineLauncher, VersionSpec};
use crate::error::EngineError;
use crate::observation::ResponseObservation;
use crate::protocol::{RESPONSE_PREFIX, Request, RequestStartReplay, Response};
use crate::replay::ReplayInfo;

/// How long `close` waits for a quitting engine before killing it.
const EXIT_GRACE: Duration = Duration::from_secs(5);

type SharedChild = Arc<Mutex<Child>>;

fn lock(child: &SharedChild) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Every engine process started by one launcher that is still held by its
/// handle. Lets another thread kill engines whose handle is blocked waiting
/// for an answer; the blocked call then fails with `WorkerExited`.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    children: Arc<Mutex<Vec<Weak<Mutex<Child>>>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, child: &SharedChild) {
        let mut children = self.children.lock().unwrap_or_else(PoisonError::into_inner);
        children.retain(|c| c.strong_count() > 0);
        children.push(Arc::downgrade(child));
    }

    fn live(&self) -> Vec<SharedChild> {
        let children = self.children.lock().unwrap_or_else(PoisonError::into_inner);
        children.iter().filter_map(Weak::upgrade).collect()
    }

    /// Process ids of the engines still held.
    pub fn pids(&self) -> Vec<u32> {
        self.live().iter().map(|c| lock(c).id()).collect()
    }

    /// Kill every engine still held. Returns how many were signalled.
    pub fn kill_all(&self) -> usize {
        let mut killed = 0;
        for child in self.live() {
            let mut child = lock(&child);
            match child.kill() {
                Ok(()) => {
                    warn!("killed engine {}", child.id());
                    killed += 1;
                }
                Err(e) => debug!("engine {} not killed: {}", child.id(), e),
            }
        }
        killed
    }
}

/// Launches engine binaries as child processes.
#[derive(Debug, Clone, Default)]
pub struct SubprocessLauncher {
    engine_dir: Option<PathBuf>,
    leading_args: Vec<String>,
    registry: ProcessRegistry,
}

impl SubprocessLauncher {
    pub fn new(engine_dir: Option<PathBuf>) -> Self {
        Self {
            engine_dir,
            ..Self::default()
        }
    }

    /// Pass `args` to every engine ahead of `--build` / `--data-version`.
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Registry of the engines this launcher started.
    pub fn registry(&self) -> ProcessRegistry {
        self.registry.clone()
    }

    /// Map a binary identifier to something `Command` can run.
    ///
    /// Existing files win, then files under the engine directory. A bare
    /// name that matches neither is handed to the OS for a `PATH` lookup.
    pub fn resolve_binary(&self, binary: &str) -> Result<PathBuf, EngineError> {
        let direct = Path::new(binary);
        if direct.is_file() {
            return Ok(direct.to_path_buf());
        }
        if let Some(dir) = &self.engine_dir {
            let candidate = dir.join(binary);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        if binary.contains(MAIN_SEPARATOR) || binary.contains('/') {
            return Err(EngineError::BinaryNotFound(binary.to_string()));
        }
        Ok(direct.to_path_buf())
    }
}

impl EngineLauncher for SubprocessLauncher {
    type Engine = SubprocessEngine;

    fn launch(&self, spec: &VersionSpec) -> Result<SubprocessEngine, EngineError> {
        let path = self.resolve_binary(&spec.binary)?;
        debug!("launching {} for build {}", path.display(), spec.version.build);

        let mut command = Command::new(&path);
        command
            .args(&self.leading_args)
            .arg("--build")
            .arg(spec.version.build.to_string())
            .arg("--data-version")
            .arg(&spec.version.data_version)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        // Keep engines out of the terminal's process group so Ctrl-C only
        // reaches the harness, which then shuts them down in order.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|source| EngineError::Spawn {
            binary: spec.binary.clone(),
            source,
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EngineError::WorkerExited);
        };

        debug!("engine {} started", child.id());
        let child = Arc::new(Mutex::new(child));
        self.registry.register(&child);

        Ok(SubprocessEngine {
            child: Some(child),
            writer: Some(BufWriter::new(stdin)),
            reader: BufReader::new(stdout),
        })
    }
}

/// One engine child process and its request/response channel.
pub struct SubprocessEngine {
    child: Option<SharedChild>,
    writer: Option<BufWriter<ChildStdin>>,
    reader: BufReader<ChildStdout>,
}

impl SubprocessEngine {
    fn send(&mut self, request: &Request) -> Result<Response, EngineError> {
        let json = serde_json::to_string(request)?;
        let writer = self.writer.as_mut().ok_or(EngineError::WorkerExited)?;
        writer.write_all(json.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Err(EngineError::WorkerExited);
            }
            if let Some(json_content) = line.trim().strip_prefix(RESPONSE_PREFIX) {
                return match serde_json::from_str(json_content)? {
                    Response::Error(e) => Err(EngineError::Remote(e)),
                    resp => Ok(resp),
                };
            }
        }
    }

    fn send_expect_ok(&mut self, request: &Request) -> Result<(), EngineError> {
        match self.send(request)? {
            Response::Ok => Ok(()),
            other => Err(EngineError::unexpected(request.name(), other)),
        }
    }
}

impl EngineController for SubprocessEngine {
    fn replay_info(&mut self, replay_data: &[u8]) -> Result<ReplayInfo, EngineError> {
        let request = Request::ReplayInfo {
            replay_data: replay_data.to_vec(),
        };
        match self.send(&request)? {
            Response::ReplayInfo(info) => Ok(info),
            other => Err(EngineError::unexpected(request.name(), other)),
        }
    }

    fn start_replay(&mut self, request: &RequestStartReplay) -> Result<(), EngineError> {
        self.send_expect_ok(&Request::StartReplay(request.clone()))
    }

    fn step(&mut self, count: u32) -> Result<(), EngineError> {
        self.send_expect_ok(&Request::Step { count })
    }

    fn observe(&mut self) -> Result<ResponseObservation, EngineError> {
        match self.send(&Request::Observe)? {
            Response::Observation(obs) => Ok(*obs),
            other => Err(EngineError::unexpected("observe", other)),
        }
    }

    fn quit(&mut self) -> Result<(), EngineError> {
        self.send_expect_ok(&Request::Quit)
    }

    fn close(mut self) -> Result<(), EngineError> {
        // Dropping stdin gives the engine EOF in case quit never got through.
        drop(self.writer.take());

        let Some(shared) = self.child.take() else {
            return Ok(());
        };

        let deadline = Instant::now() + EXIT_GRACE;
        loop {
            // Locked per poll so the registry can still kill it meanwhile.
            let mut child = lock(&shared);
            if let Some(status) = child.try_wait()? {
                debug!("engine {} exited with {}", child.id(), status);
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!("engine {} did not exit, killing it", child.id());
                child.kill()?;
                child.wait()?;
                return Ok(());
            }
            drop(child);
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for SubprocessEngine {
    fn drop(&mut self) {
        if let Some(child) = self.child.take() {
            let mut child = lock(&child);
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
