use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use runwatch_protocol::{TRACE_ENABLED_ENV, TRACE_PATH_ENV};

/// Default interpreter of the scripts to run.
pub const DEFAULT_INTERPRETER: &str = "python3";

/// Description of the worker process running a script.
///
/// The worker is spawned as `<interpreter> <interpreter args> <script>
/// <script args>`, from the directory containing the script.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    /// Interpreter running the script. If `None`, the script is executed
    /// directly.
    pub interpreter: Option<PathBuf>,

    /// Arguments passed to the interpreter, before the script path.
    pub interpreter_args: Vec<String>,

    /// Script to run.
    pub script: PathBuf,

    /// Arguments passed to the script.
    pub args: Vec<String>,

    /// Environment variables the worker will have, in addition to the ones
    /// inherited from the supervisor.
    ///
    /// A `None` value indicates that the environment variable will be removed
    /// from the worker, even if it was inherited.
    pub env: BTreeMap<String, Option<String>>,
}

impl WorkerCommand {
    /// Constructs a new `WorkerCommand` for running the script at path
    /// `script` with the [default interpreter](DEFAULT_INTERPRETER).
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: Some(DEFAULT_INTERPRETER.into()),
            interpreter_args: Vec::new(),
            script: script.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    /// Sets the interpreter running the script.
    ///
    /// If `interpreter` is not an absolute path, the `PATH` will be searched
    /// in an OS-defined way.
    pub fn interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    /// Executes the script directly, without interpreter.
    pub fn no_interpreter(mut self) -> Self {
        self.interpreter = None;
        self
    }

    /// Adds an argument to pass to the interpreter.
    pub fn interpreter_arg(mut self, arg: impl Into<String>) -> Self {
        self.interpreter_args.push(arg.into());
        self
    }

    /// Adds an argument to pass to the script.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds multiple arguments to pass to the script.
    pub fn args<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        args.into_iter().fold(self, |cmd, arg| cmd.arg(arg))
    }

    /// Inserts or updates an explicit environment variable mapping.
    pub fn env(mut self, key: impl Into<String>, val: impl Into<String>) -> Self {
        self.env.insert(key.into(), Some(val.into()));
        self
    }

    /// Prevents the worker from inheriting an environment variable.
    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env.insert(key.into(), None);
        self
    }

    /// Returns the directory the worker runs from.
    pub fn working_dir(&self) -> PathBuf {
        match self.script.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_owned(),
            _ => PathBuf::from("."),
        }
    }

    /// Builds the command spawning the worker, with tracing enabled towards
    /// `trace_path`.
    pub(crate) fn to_command(&self, trace_path: &Path) -> std::io::Result<tokio::process::Command> {
        // the worker doesn't run from our directory
        let script = std::path::absolute(&self.script)?;
        let working_dir = std::path::absolute(self.working_dir())?;

        let mut command = match self.interpreter {
            Some(ref interpreter) => {
                let mut command = tokio::process::Command::new(interpreter);
                command.args(&self.interpreter_args).arg(&script);
                command
            }
            None => tokio::process::Command::new(&script),
        };

        command.args(&self.args).current_dir(working_dir);

        for (key, val) in &self.env {
            match val {
                Some(val) => command.env(key, val),
                None => command.env_remove(key),
            };
        }

        command
            .env(TRACE_ENABLED_ENV, "1")
            .env(TRACE_PATH_ENV, trace_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // the whole tree gets signalled through the group
        #[cfg(unix)]
        command.process_group(0);

        Ok(command)
    }
}
