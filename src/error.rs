use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Invalid run configuration. Always fatal and reported before any worker starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("shell is required")]
    MissingShell,

    #[error("command is required")]
    MissingCommand,

    #[error("offset {offset} cannot be greater than limit {limit}")]
    InvalidRange { offset: u64, limit: u64 },

    #[error("batch size must be greater than zero")]
    ZeroBatchSize,

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("worker count must be greater than zero")]
    ZeroWorkers,

    #[error("log file size limit must be greater than zero")]
    ZeroRotationSize,

    #[error("{kind} directory {path:?} does not exist: {source}")]
    MissingDirectory {
        kind: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{kind} directory {path:?} is not a directory")]
    NotADirectory { kind: &'static str, path: PathBuf },

    #[error("cannot resolve the current directory for logs: {0}")]
    CurrentDirectory(#[source] std::io::Error),
}

/// Template parse or evaluation failure, flattened to one line. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct RenderError(pub String);

/// One failed attempt of a job.
#[derive(Error, Debug)]
pub enum AttemptError {
    #[error("failed to render template: {0}")]
    Render(#[from] RenderError),

    #[error("failed to open output sink: {0}")]
    Sink(#[source] std::io::Error),

    #[error("failed to start process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("process exited with non-zero status: {0}")]
    Exit(i32),

    #[error("process terminated by signal {0}")]
    Signaled(i32),

    #[error("process killed after timeout of {0:?}")]
    Timeout(Duration),

    #[error("process killed because the run was cancelled")]
    Cancelled,

    #[error("failed to wait for process exit: {0}")]
    Wait(#[source] std::io::Error),
}

impl AttemptError {
    /// Whether a fresh attempt could succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AttemptError::Render(_) | AttemptError::Cancelled)
    }

    /// Short stable label for log fields.
    pub fn as_label(&self) -> &'static str {
        match self {
            AttemptError::Render(_) => "render_failed",
            AttemptError::Sink(_) => "sink_failed",
            AttemptError::Spawn(_) => "spawn_failed",
            AttemptError::Exit(_) => "exit_code",
            AttemptError::Signaled(_) => "signaled",
            AttemptError::Timeout(_) => "timeout",
            AttemptError::Cancelled => "cancelled",
            AttemptError::Wait(_) => "wait_failed",
        }
    }
}

/// Run-level failure. Individual job failures never surface here.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("configuration is not valid: {0}")]
    Config(#[from] ConfigError),

    #[error("premature execution killed by a dead context")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, RunError>;
