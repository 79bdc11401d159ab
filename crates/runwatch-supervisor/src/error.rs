use std::path::PathBuf;

use crate::SupervisorState;

/// Error type of this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The script to run doesn't exist.
    #[error("script not found: {}", .0.display())]
    ScriptNotFound(PathBuf),

    /// The worker is already running.
    #[error("worker already running")]
    AlreadyRunning,

    /// The operation requires a running worker.
    #[error("worker not running ({0})")]
    NotRunning(SupervisorState),

    /// The directory holding the trace channel couldn't be created.
    #[error("trace channel directory: {0}")]
    ChannelDir(#[source] std::io::Error),

    /// The worker process couldn't be spawned.
    #[error("cannot spawn {}: {}", .0.display(), .1)]
    Spawn(PathBuf, #[source] std::io::Error),
}

/// Result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;
