use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::sys::signal::Signal;
use runwatch_collector::{Collector, Event, EventSink, OutputStream};
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::monitor::ExitMonitor;
use crate::process::ProcessTree;
use crate::reader::{OutputReader, PauseGate};
use crate::tailer::TraceTailer;
use crate::{Status, SupervisorConfig, SupervisorState, WorkerCommand, WorkerExit};

/// Supervisor of a traced worker process.
///
/// It spawns the worker, drains its output pipes and its trace channel into
/// a [Collector], and controls its lifecycle.
///
/// Dropping the supervisor kills the worker's process tree.
pub struct Supervisor {
    command: WorkerCommand,
    config: SupervisorConfig,
    collector: Arc<Collector>,
    status: Arc<watch::Sender<Status>>,
    gate: Arc<PauseGate>,
    channel_dir: Option<TempDir>,
    session: Option<Session>,
}

/// Resources of a spawned worker.
struct Session {
    pid: u32,
    trace_path: PathBuf,

    /// Cancelled to stop the readers.
    shutdown: CancellationToken,

    /// Cancelled once the worker exited.
    exited: CancellationToken,

    stop_requested: Arc<AtomicBool>,
    tasks: JoinSet<()>,
}

impl Supervisor {
    /// Creates a supervisor of the worker described by `command`, collecting
    /// its events into `collector`.
    ///
    /// No worker is spawned until [start](Self::start) is called.
    pub fn new(command: WorkerCommand, config: SupervisorConfig, collector: Arc<Collector>) -> Self {
        let (status, _) = watch::channel(Status {
            generation: collector.generation(),
            ..Status::default()
        });

        Self {
            command,
            config,
            collector,
            status: Arc::new(status),
            gate: Arc::default(),
            channel_dir: None,
            session: None,
        }
    }

    /// Spawns the worker.
    ///
    /// Events of the worker are tagged with the current generation of the
    /// collector.
    ///
    /// # Errors
    ///
    /// It fails if the worker is already running, if the script doesn't
    /// exist, or if the worker can't be spawned.
    #[tracing::instrument(
        name = "Start",
        skip(self),
        fields(script = %self.command.script.display(), generation = self.collector.generation())
    )]
    pub async fn start(&mut self) -> Result<()> {
        if self.state().is_running() {
            return Err(Error::AlreadyRunning);
        }

        if !self.command.script.is_file() {
            return Err(Error::ScriptNotFound(self.command.script.clone()));
        }

        // the previous worker exited on its own
        if let Some(session) = self.session.take() {
            self.teardown(session).await;
        }

        let generation = self.collector.generation();

        let channel_dir = match self.channel_dir.take() {
            Some(dir) => dir,
            None => tempfile::Builder::new()
                .prefix("runwatch-")
                .tempdir()
                .map_err(Error::ChannelDir)?,
        };
        let trace_path = channel_dir.path().join(format!("trace-{generation}.jsonl"));
        self.channel_dir = Some(channel_dir);

        let mut child = self
            .command
            .to_command(&trace_path)
            .and_then(|mut command| command.spawn())
            .map_err(|e| Error::Spawn(self.command.script.clone(), e))?;

        let Some(pid) = child.id() else {
            unreachable!("child not polled yet")
        };
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            unreachable!("output pipes not taken yet")
        };

        tracing::info!(pid, generation, "worker started");

        self.gate.resume();
        self.collector.set_dispatch_paused(false);

        let sink = self.collector.sink();
        sink.add_output(format!("started process {pid}"), OutputStream::System);

        // published before the monitor may observe an exit
        self.status.send_replace(Status {
            state: SupervisorState::Running,
            generation,
            pid: Some(pid),
            exit: None,
        });

        let shutdown = CancellationToken::new();
        let exited = CancellationToken::new();
        let stop_requested = Arc::new(AtomicBool::new(false));
        let mut tasks = JoinSet::new();

        tasks.spawn(
            self.output_reader(stdout, OutputStream::Stdout, &sink, &shutdown, &exited)
                .run(),
        );

        tasks.spawn(
            self.output_reader(stderr, OutputStream::Stderr, &sink, &shutdown, &exited)
                .run(),
        );

        tasks.spawn(
            TraceTailer {
                path: trace_path.clone(),
                sink: sink.clone(),
                shutdown: shutdown.clone(),
                exited: exited.clone(),
                poll_interval: self.config.poll_interval,
                retries: self.config.channel_retries,
                retry_interval: self.config.channel_retry_interval,
            }
            .run(),
        );

        tasks.spawn(
            ExitMonitor {
                child,
                sink,
                status: self.status.clone(),
                gate: self.gate.clone(),
                stop_requested: stop_requested.clone(),
                exited: exited.clone(),
            }
            .run(),
        );

        self.session = Some(Session {
            pid,
            trace_path,
            shutdown,
            exited,
            stop_requested,
            tasks,
        });

        Ok(())
    }

    /// Stops the worker.
    ///
    /// The worker's process tree is asked to terminate, and killed if it is
    /// still alive after the configured stop timeout. Readers are then shut
    /// down.
    ///
    /// Stopping a supervisor without worker does nothing.
    #[tracing::instrument(name = "Stop", skip(self), fields(pid = self.pid()))]
    pub async fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        session.stop_requested.store(true, Ordering::SeqCst);

        if self.terminate(&session).await {
            self.collector.add_output(
                format!(
                    "process tree killed after {} ms",
                    self.config.stop_timeout.as_millis()
                ),
                OutputStream::System,
            );
        }

        self.teardown(session).await;

        self.gate.resume();
        self.collector.set_dispatch_paused(false);

        self.status.send_if_modified(|status| {
            if !status.state.is_running() {
                return false;
            }

            status.state = SupervisorState::Stopped;
            true
        });
    }

    /// Stops the worker, clears the collector and starts a new worker.
    ///
    /// Events of the previous worker can't reach the collector anymore, even
    /// if some of its readers were still running.
    ///
    /// # Errors
    ///
    /// See [start](Self::start).
    #[tracing::instrument(name = "Restart", skip(self), fields(pid = self.pid()))]
    pub async fn restart(&mut self) -> Result<()> {
        self.stop().await;
        self.collector.clear();
        self.start().await
    }

    /// Pauses the delivery of the worker's events.
    ///
    /// The worker keeps running. Its output is drained and discarded, and
    /// its trace events are recorded but kept out of the live queue.
    ///
    /// The pause is lifted once the worker terminates.
    ///
    /// # Errors
    ///
    /// It fails if no worker is running.
    pub fn pause(&self) -> Result<()> {
        let mut res = Ok(());

        let paused = self.status.send_if_modified(|status| match status.state {
            SupervisorState::Running => {
                self.gate.pause();
                self.collector.set_dispatch_paused(true);
                status.state = SupervisorState::Paused;
                true
            }
            SupervisorState::Paused => false,
            state => {
                res = Err(Error::NotRunning(state));
                false
            }
        });

        if paused {
            tracing::info!("worker paused");
        }

        res
    }

    /// Resumes the delivery of the worker's events.
    ///
    /// The number of output lines discarded while paused is reported as a
    /// system line.
    ///
    /// # Errors
    ///
    /// It fails if no worker is running.
    pub fn resume(&self) -> Result<()> {
        let mut res = Ok(());
        let mut discarded = None;

        self.status.send_if_modified(|status| match status.state {
            SupervisorState::Paused => {
                self.collector.set_dispatch_paused(false);
                discarded = Some(self.gate.resume());
                status.state = SupervisorState::Running;
                true
            }
            SupervisorState::Running => false,
            state => {
                res = Err(Error::NotRunning(state));
                false
            }
        });

        if let Some(discarded) = discarded {
            tracing::info!(discarded, "worker resumed");

            if discarded > 0 {
                self.collector.add_output(
                    format!("{discarded} output lines discarded while paused"),
                    OutputStream::System,
                );
            }
        }

        res
    }

    /// Waits for the worker to terminate.
    ///
    /// Returns immediately if no worker is running.
    pub async fn wait(&self) -> Option<WorkerExit> {
        let mut status = self.status.subscribe();

        // the sender lives as long as `self`
        let status = status
            .wait_for(|status| !status.state.is_running())
            .await
            .ok()?;

        status.exit
    }

    /// Waits for the next event of the collector's live queue.
    ///
    /// See [Collector::next_event].
    pub async fn next_event(&self) -> Option<Event> {
        self.collector.next_event().await
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> SupervisorState {
        self.status.borrow().state
    }

    /// Returns a snapshot of the supervisor.
    pub fn status(&self) -> Status {
        Status::clone(&self.status.borrow())
    }

    /// Returns a receiver of the supervisor's status updates.
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    /// Returns whether a worker is alive (running or paused).
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Returns whether event delivery is paused.
    pub fn is_paused(&self) -> bool {
        self.state() == SupervisorState::Paused
    }

    /// Returns the process ID of the current (or last) worker.
    pub fn pid(&self) -> Option<u32> {
        self.status.borrow().pid
    }

    /// Returns the exit code of the last worker, once it terminated.
    pub fn exit_code(&self) -> Option<i32> {
        self.status.borrow().exit.map(WorkerExit::code)
    }

    /// Returns the collector of the worker's events.
    pub const fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }

    /// Returns the worker description.
    pub const fn command(&self) -> &WorkerCommand {
        &self.command
    }

    fn output_reader<R>(
        &self,
        reader: R,
        stream: OutputStream,
        sink: &EventSink,
        shutdown: &CancellationToken,
        exited: &CancellationToken,
    ) -> OutputReader<R> {
        OutputReader {
            reader,
            stream,
            sink: sink.clone(),
            gate: self.gate.clone(),
            shutdown: shutdown.clone(),
            exited: exited.clone(),
            drain_timeout: self.config.drain_timeout,
        }
    }

    /// Terminates the worker's process tree, gracefully if possible.
    ///
    /// Returns whether the tree had to be killed.
    async fn terminate(&self, session: &Session) -> bool {
        let tree = ProcessTree::snapshot(session.pid, !session.exited.is_cancelled());

        if tree.signal(Signal::SIGTERM) == 0 && session.exited.is_cancelled() {
            return false;
        }

        let deadline = Instant::now() + self.config.stop_timeout;

        loop {
            let exited = session.exited.is_cancelled();

            if exited && tree.is_terminated() {
                tracing::debug!("process tree terminated");
                return false;
            }

            if Instant::now() >= deadline {
                break;
            }

            tokio::select! {
                _ = session.exited.cancelled(), if !exited => (),
                _ = tokio::time::sleep(self.config.poll_interval) => (),
            }
        }

        tracing::warn!(
            survivors = ?tree.survivors(),
            group = tree.is_group_alive(),
            timeout = ?self.config.stop_timeout,
            "process tree still alive, killing it"
        );

        tree.signal(Signal::SIGKILL);

        if tokio::time::timeout(self.config.stop_timeout, session.exited.cancelled())
            .await
            .is_err()
        {
            tracing::error!(pid = session.pid, "worker not reaped after SIGKILL");
        }

        true
    }

    /// Shuts the readers of a terminated worker down.
    ///
    /// They are first given a chance to drain what the worker left behind.
    async fn teardown(&self, mut session: Session) {
        let grace = self.config.drain_timeout + self.config.poll_interval;

        if !join_tasks(&mut session.tasks, grace).await {
            session.shutdown.cancel();

            if !join_tasks(&mut session.tasks, self.config.stop_timeout).await {
                tracing::warn!("worker tasks still running, aborting them");
                session.tasks.abort_all();
            }
        }

        match tokio::fs::remove_file(&session.trace_path).await {
            Ok(()) => (),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (),
            Err(e) => tracing::warn!(error = %e, "remove trace channel"),
        }
    }
}

/// Waits for every task of the set to finish.
///
/// Returns `false` on timeout.
async fn join_tasks(tasks: &mut JoinSet<()>, timeout: Duration) -> bool {
    let joined = tokio::time::timeout(timeout, async {
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                tracing::warn!(error = %e, "worker task failed");
            }
        }
    })
    .await;

    joined.is_ok()
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        session.shutdown.cancel();

        let tree = ProcessTree::snapshot(session.pid, !session.exited.is_cancelled());
        if tree.signal(Signal::SIGKILL) > 0 {
            tracing::debug!(pid = session.pid, "process tree killed on drop");
        }
    }
}
