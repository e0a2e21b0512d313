//! Engine-side error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while launching or talking to an engine, or loading a replay.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine binary not found: {0}")]
    BinaryNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("engine process exited unexpectedly")]
    WorkerExited,

    #[error("engine returned an error: {0}")]
    Remote(String),

    #[error("unexpected response to {request}: {response}")]
    UnexpectedResponse {
        request: &'static str,
        response: String,
    },

    #[error("replay not found: {}", .0.display())]
    ReplayNotFound(PathBuf),

    #[error("invalid replay: {0}")]
    InvalidReplay(String),
}

impl EngineError {
    pub(crate) fn unexpected(request: &'static str, response: impl std::fmt::Debug) -> Self {
        let response = format!("{:?}", response).chars().take(200).collect();
        Self::UnexpectedResponse { request, response }
    }
}
