//! Crate implementing the CLI commands.

mod cli;
mod config;
mod console;
mod run;

pub use self::cli::{CliAction, CliOpts};
pub use self::config::{InterpreterConfig, RunConfig};
pub use self::console::Console;
pub use self::run::{ControlKey, evaluate_run};
