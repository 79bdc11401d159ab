use std::fmt;
use std::process::ExitStatus;

/// Lifecycle state of a [Supervisor](crate::Supervisor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupervisorState {
    /// No worker was started yet.
    NotStarted,

    /// The worker is running, and its events are delivered.
    Running,

    /// The worker is running, but its output is discarded and its events
    /// are kept out of the live queue.
    Paused,

    /// The worker was stopped, or exited successfully.
    Stopped,

    /// The worker exited with a failure, without being asked to.
    Crashed,
}

impl SupervisorState {
    /// Returns whether a worker is alive in this state.
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    /// Returns the name of this state.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not started",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Crashed => "crashed",
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a worker process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerExit {
    /// The worker exited with the given code.
    Code(i32),

    /// The worker was terminated by the given signal.
    Signal(i32),
}

impl WorkerExit {
    /// Returns whether the worker exited with code 0.
    pub const fn success(self) -> bool {
        matches!(self, Self::Code(0))
    }

    /// Returns the exit code, in the shell convention (`128 + signal` for
    /// signal deaths).
    pub const fn code(self) -> i32 {
        match self {
            Self::Code(code) => code,
            Self::Signal(signal) => 128 + signal,
        }
    }
}

impl From<ExitStatus> for WorkerExit {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;

            if let Some(signal) = status.signal() {
                return Self::Signal(signal);
            }
        }

        Self::Code(status.code().unwrap_or(-1))
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit code {code}"),
            Self::Signal(signal) => write!(f, "signal {signal}"),
        }
    }
}

/// Snapshot of a [Supervisor](crate::Supervisor), as published to
/// [subscribers](crate::Supervisor::subscribe).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Lifecycle state.
    pub state: SupervisorState,

    /// Collector generation of the current (or last) worker.
    pub generation: u64,

    /// Process ID of the current (or last) worker.
    pub pid: Option<u32>,

    /// How the last worker terminated, once it did.
    pub exit: Option<WorkerExit>,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            state: SupervisorState::NotStarted,
            generation: 0,
            pid: None,
            exit: None,
        }
    }
}
