use std::path::PathBuf;
use std::sync::Arc;

use miette::IntoDiagnostic;
use runwatch_collector::Collector;
use runwatch_supervisor::Supervisor;
use tokio::sync::mpsc;

use crate::{Console, RunConfig};

/// Key controlling a watched run, read from the standard input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKey {
    /// Pause the event delivery.
    Pause,

    /// Resume the event delivery.
    Resume,

    /// Restart the script.
    Restart,

    /// Stop the script and quit.
    Quit,
}

impl ControlKey {
    /// Parses a line of input into a control key.
    pub fn from_line(line: &str) -> Option<Self> {
        match line.trim() {
            "p" => Some(Self::Pause),
            "r" => Some(Self::Resume),
            "R" => Some(Self::Restart),
            "q" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Runs a script, and prints its execution events to the standard output
/// until it terminates.
///
/// Returns the exit code of the script.
pub async fn evaluate_run(
    config: RunConfig,
    interpreter: Option<PathBuf>,
    script: PathBuf,
    args: Vec<String>,
) -> miette::Result<i32> {
    let collector = Arc::new(Collector::new());

    let mut supervisor = Supervisor::new(
        config.worker_command(interpreter, script, args),
        config.supervisor_config(),
        collector.clone(),
    );

    supervisor.start().await.into_diagnostic()?;

    let printer = tokio::spawn(print_events(collector.clone()));

    let mut keys = spawn_key_reader();
    let mut status = supervisor.subscribe();

    while supervisor.is_running() {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.into_diagnostic()?;
                tracing::info!("interrupted");
                break;
            }
            Some(key) = keys.recv() => {
                tracing::debug!(?key, "control key");

                let res = match key {
                    ControlKey::Pause => supervisor.pause(),
                    ControlKey::Resume => supervisor.resume(),
                    ControlKey::Restart => supervisor.restart().await,
                    ControlKey::Quit => break,
                };

                if let Err(e) = res {
                    tracing::warn!(error = %e, ?key, "control key ignored");
                }
            }
            res = status.changed() => res.into_diagnostic()?,
        }
    }

    supervisor.stop().await;

    // the printer drains what is left, then ends
    collector.cancel();
    if let Err(e) = printer.await.into_diagnostic()? {
        tracing::warn!(error = %e, "console output failed");
    }

    Ok(supervisor.exit_code().unwrap_or_default())
}

async fn print_events(collector: Arc<Collector>) -> std::io::Result<()> {
    let mut console = Console::new(std::io::stdout());

    while let Some(event) = collector.next_event().await {
        console.write_event(&event)?;
    }

    Ok(())
}

/// Reads control keys from the standard input, on a dedicated thread (reads
/// can't be cancelled).
fn spawn_key_reader() -> mpsc::Receiver<ControlKey> {
    let (tx, rx) = mpsc::channel(8);

    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else {
                break;
            };

            if let Some(key) = ControlKey::from_line(&line) {
                if tx.blocking_send(key).is_err() {
                    break;
                }
            }
        }
    });

    rx
}
