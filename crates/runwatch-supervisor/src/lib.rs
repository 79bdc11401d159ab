//! Supervision of a traced worker process.
//!
//! A [Supervisor] runs a script in a worker process, with tracing enabled
//! through the `RUNWATCH_TRACE` and `RUNWATCH_TRACE_PATH` environment
//! variables. While the worker runs:
//!
//! * its standard output and error are read line by line,
//! * its trace channel (a JSON-lines file) is followed,
//!
//! and everything is fed into a [Collector](runwatch_collector::Collector),
//! from which a consumer receives an ordered stream of events.
//!
//! Stopping the worker terminates its whole process tree (graceful signal
//! first, forced kill after a timeout). Restarting clears the collector, so
//! that events of the previous worker never mix with the new ones.
//!
//! This crate only supports Unix platforms.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use runwatch_collector::{Collector, Event};
//! use runwatch_supervisor::{Supervisor, SupervisorConfig, WorkerCommand};
//!
//! # async fn run() -> runwatch_supervisor::Result<()> {
//! let collector = Arc::new(Collector::new());
//! let command = WorkerCommand::new("scripts/main.py");
//!
//! let mut supervisor = Supervisor::new(command, SupervisorConfig::default(), collector);
//! supervisor.start().await?;
//!
//! while let Some(event) = supervisor.next_event().await {
//!     if let Event::Call(call) = event {
//!         println!("{} called", call.function_name);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod command;
mod config;
mod error;
mod monitor;
mod process;
mod reader;
mod state;
mod supervisor;
mod tailer;

pub use self::command::{DEFAULT_INTERPRETER, WorkerCommand};
pub use self::config::SupervisorConfig;
pub use self::error::{Error, Result};
pub use self::process::ProcessTree;
pub use self::state::{Status, SupervisorState, WorkerExit};
pub use self::supervisor::Supervisor;
