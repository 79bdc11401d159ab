use std::path::PathBuf;
use std::time::Duration;

use runwatch_supervisor::{SupervisorConfig, WorkerCommand};

/// Configuration of a watched run.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct RunConfig {
    /// Interpreter running the script.
    #[knus(child)]
    pub interpreter: Option<InterpreterConfig>,

    /// Time given to the process tree to exit gracefully when stopped.
    #[knus(child, default = 2000, unwrap(argument))]
    pub stop_timeout_ms: u64,

    /// Time between two reads of the trace channel at its end.
    #[knus(child, default = 50, unwrap(argument))]
    pub poll_interval_ms: u64,

    /// Time the output keeps being drained after the script exited.
    #[knus(child, default = 500, unwrap(argument))]
    pub drain_timeout_ms: u64,

    /// Number of attempts at opening the trace channel.
    #[knus(child, default = 30, unwrap(argument))]
    pub channel_retries: u32,

    /// Time between two attempts at opening the trace channel.
    #[knus(child, default = 200, unwrap(argument))]
    pub channel_retry_interval_ms: u64,
}

/// Configuration of the interpreter running the script.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct InterpreterConfig {
    /// Path (or name) of the interpreter.
    #[knus(argument)]
    pub program: String,

    /// Arguments passed to the interpreter, before the script path.
    #[knus(arguments)]
    pub args: Vec<String>,
}

impl RunConfig {
    /// Returns the supervisor tuning described by this configuration.
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
            channel_retries: self.channel_retries,
            channel_retry_interval: Duration::from_millis(self.channel_retry_interval_ms),
        }
    }

    /// Returns the description of the worker running `script`.
    ///
    /// The interpreter given by `interpreter` takes precedence over the
    /// configured one (which defaults to `python3`).
    pub fn worker_command(
        &self,
        interpreter: Option<PathBuf>,
        script: PathBuf,
        args: Vec<String>,
    ) -> WorkerCommand {
        let mut command = WorkerCommand::new(script).args(args);

        if let Some(ref config) = self.interpreter {
            command = config
                .args
                .iter()
                .fold(command.interpreter(&config.program), |cmd, arg| {
                    cmd.interpreter_arg(arg)
                });
        }

        match interpreter {
            Some(interpreter) => command.interpreter(interpreter),
            None => command,
        }
    }
}
