use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use runwatch_collector::{EventSink, OutputStream};
use runwatch_protocol::ExceptionRecord;
use tokio::process::Child;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::reader::PauseGate;
use crate::{Status, SupervisorState, WorkerExit};

/// Waits for the worker to exit, and publishes its final state.
pub(crate) struct ExitMonitor {
    pub child: Child,
    pub sink: EventSink,
    pub status: Arc<watch::Sender<Status>>,
    pub gate: Arc<PauseGate>,
    pub stop_requested: Arc<AtomicBool>,

    /// Cancelled once the worker exited.
    pub exited: CancellationToken,
}

/// How the worker's termination is reported.
enum Report {
    Exit(String),
    WaitFailed(ExceptionRecord),
}

impl ExitMonitor {
    pub async fn run(mut self) {
        let generation = self.sink.generation();

        let (state, exit, report) = match self.child.wait().await {
            Ok(status) => {
                let exit = WorkerExit::from(status);
                let requested = self.stop_requested.load(Ordering::SeqCst);

                tracing::info!(%exit, requested, "worker exited");

                let message = match exit {
                    WorkerExit::Code(code) => format!("process exited with code {code}"),
                    WorkerExit::Signal(signal) => format!("process killed by signal {signal}"),
                };

                let state = if requested || exit.success() {
                    SupervisorState::Stopped
                } else {
                    SupervisorState::Crashed
                };

                (state, Some(exit), Report::Exit(message))
            }
            Err(e) => {
                tracing::error!(error = %e, "wait worker");
                (
                    SupervisorState::Crashed,
                    None,
                    Report::WaitFailed(ExceptionRecord::from_error(&e)),
                )
            }
        };

        let mut report = Some(report);

        // queued once the pause is lifted, before the final state is published
        self.status.send_if_modified(|status| {
            // a newer worker may already be running
            if status.generation != generation || !status.state.is_running() {
                return false;
            }

            if status.state == SupervisorState::Paused {
                self.lift_pause();
            }

            if let Some(report) = report.take() {
                self.report(report);
            }

            (status.state, status.exit) = (state, exit);
            true
        });

        if let Some(report) = report {
            self.report(report);
        }

        self.exited.cancel();
    }

    fn lift_pause(&self) {
        self.sink.collector().set_dispatch_paused(false);

        let discarded = self.gate.resume();
        tracing::debug!(discarded, "pause lifted by worker exit");

        if discarded > 0 {
            self.sink.add_output(
                format!("{discarded} output lines discarded while paused"),
                OutputStream::System,
            );
        }
    }

    fn report(&self, report: Report) {
        match report {
            Report::Exit(message) => {
                self.sink.add_output(message, OutputStream::System);
            }
            Report::WaitFailed(exception) => {
                self.sink.add_exception(exception);
            }
        }
    }
}
