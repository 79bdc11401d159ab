#![allow(missing_docs)]
#![allow(clippy::print_stderr)]

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use miette::IntoDiagnostic;

use runwatch_cli::{CliAction, CliOpts, RunConfig};

use tracing_subscriber::EnvFilter;

fn main() {
    let cli = CliOpts::parse_from_cmdline();

    // stdout is reserved for events
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("RUNWATCH_LOG")
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let res = match cli.action {
        CliAction::Run {
            config,
            interpreter,
            script,
            args,
        } => evaluate_run(config, interpreter, script, args),
    };

    match res {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            eprintln!("{e:?}");
            std::process::exit(1);
        }
    }
}

fn evaluate_run(
    config: Option<String>,
    interpreter: Option<PathBuf>,
    script: PathBuf,
    args: Vec<String>,
) -> miette::Result<i32> {
    let config = parse_run_config(config.unwrap_or_default())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;

    runtime.block_on(runwatch_cli::evaluate_run(config, interpreter, script, args))
}

fn parse_run_config(config: String) -> miette::Result<RunConfig> {
    let path = Path::new(&config);

    let config = if let Some((filename, "kdl")) = path
        .file_name()
        .and_then(OsStr::to_str)
        .zip(path.extension().and_then(OsStr::to_str))
    {
        let content = std::fs::read_to_string(path).into_diagnostic()?;
        knus::parse(filename, &content)?
    } else {
        knus::parse("<content>", &config)?
    };

    Ok(config)
}
