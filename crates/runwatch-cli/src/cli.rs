use std::path::PathBuf;

/// Runwatch, a live viewer of script executions.
#[derive(clap::Parser)]
pub struct CliOpts {
    /// The command to run.
    #[clap(subcommand)]
    pub action: CliAction,
}

/// The command to run.
#[derive(clap::Subcommand)]
pub enum CliAction {
    /// Command to run a script and watch its execution.
    ///
    /// While the script runs, the following keys (followed by Enter) control
    /// it: `p` pauses, `r` resumes, `R` restarts and `q` quits.
    Run {
        /// Run configuration (KDL format).
        ///
        /// If it ends with `.kdl`, it is treated as a path to a configuration
        /// file. Otherwise it is directly parsed as inline KDL-formatted
        /// configuration.
        #[clap(short, long, value_name = "CONTENT/PATH")]
        config: Option<String>,

        /// Interpreter running the script (overrides the configuration).
        #[clap(short, long, value_name = "PATH")]
        interpreter: Option<PathBuf>,

        /// Path of the script to run.
        script: PathBuf,

        /// Script's arguments.
        #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

impl CliOpts {
    /// Parses the CLI from the command-line.
    ///
    /// # Warning
    ///
    /// Exits on error.
    pub fn parse_from_cmdline() -> Self {
        <Self as clap::Parser>::parse()
    }
}
