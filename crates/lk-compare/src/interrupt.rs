//! Escalating response to repeated interrupts.
//!
//! The first interrupt lets the current tick finish and stops the loop.
//! That cannot help when an engine never answers, so the second one kills
//! the engine processes; the blocked call fails and the run tears down with
//! an error. Anything after that asks the caller to exit outright.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use lk_engine::ProcessRegistry;
use tracing::warn;

use crate::driver::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAction {
    /// The loop stops at the next tick boundary.
    Cancel,
    /// Engines were killed; the number signalled.
    KillEngines(usize),
    /// The caller should exit immediately.
    Exit,
}

#[derive(Debug, Clone)]
pub struct Interrupter {
    cancel: CancelToken,
    engines: ProcessRegistry,
    count: Arc<AtomicU32>,
}

impl Interrupter {
    pub fn new(cancel: CancelToken, engines: ProcessRegistry) -> Self {
        Self {
            cancel,
            engines,
            count: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Handle one interrupt.
    pub fn interrupt(&self) -> InterruptAction {
        match self.count.fetch_add(1, Ordering::SeqCst) {
            0 => {
                warn!("interrupted, finishing the current tick");
                self.cancel.cancel();
                InterruptAction::Cancel
            }
            1 => {
                self.cancel.cancel();
                warn!(pids = ?self.engines.pids(), "interrupted again, killing engines");
                InterruptAction::KillEngines(self.engines.kill_all())
            }
            _ => InterruptAction::Exit,
        }
    }
}
