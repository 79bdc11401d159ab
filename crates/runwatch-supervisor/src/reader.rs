use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use runwatch_collector::{EventSink, OutputStream};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio_util::sync::CancellationToken;

/// Consecutive read errors after which a pipe is given up.
const MAX_READ_ERRORS: u32 = 3;

/// Length after which an output line is truncated.
const MAX_LINE_LEN: u64 = 64 * 1024;

/// Pause switch shared by the output readers.
#[derive(Debug, Default)]
pub(crate) struct PauseGate {
    paused: AtomicBool,
    discarded: AtomicU64,
}

impl PauseGate {
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Lifts the pause, and returns the number of lines discarded meanwhile.
    pub fn resume(&self) -> u64 {
        self.paused.store(false, Ordering::SeqCst);
        self.discarded.swap(0, Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn discard(&self) {
        self.discarded.fetch_add(1, Ordering::SeqCst);
    }
}

/// Line reader of one of the worker's output pipes.
pub(crate) struct OutputReader<R> {
    pub reader: R,
    pub stream: OutputStream,
    pub sink: EventSink,
    pub gate: Arc<PauseGate>,

    /// Cancelled when the supervisor stops the worker.
    pub shutdown: CancellationToken,

    /// Cancelled once the worker exited.
    pub exited: CancellationToken,

    /// Time the pipe keeps being drained after the worker exited.
    pub drain_timeout: Duration,
}

impl<R: AsyncRead + Unpin> OutputReader<R> {
    pub async fn run(self) {
        let Self {
            reader,
            stream,
            sink,
            gate,
            shutdown,
            exited,
            drain_timeout,
        } = self;

        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let mut errors = 0;

        // set while the rest of a truncated line is skipped
        let mut truncated = false;

        // a descendant may keep the pipe open long after the worker is gone
        let drained = async move {
            exited.cancelled().await;
            tokio::time::sleep(drain_timeout).await;
        };
        tokio::pin!(drained);

        loop {
            buf.clear();
            let mut line = (&mut reader).take(MAX_LINE_LEN);

            let res = tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                _ = &mut drained => {
                    tracing::debug!(%stream, "pipe still open after worker exit");
                    break;
                }
                res = line.read_until(b'\n', &mut buf) => res,
            };

            match res {
                Ok(0) => break,
                Ok(len) => {
                    errors = 0;

                    if !truncated {
                        forward(&buf, stream, &sink, &gate);
                    }

                    let complete = buf.ends_with(b"\n") || (len as u64) < MAX_LINE_LEN;
                    if !complete && !truncated {
                        tracing::debug!(%stream, max_len = MAX_LINE_LEN, "output line truncated");
                    }
                    truncated = !complete;
                }
                Err(e) => {
                    if shutdown.is_cancelled() {
                        break;
                    }

                    tracing::warn!(error = %e, %stream, "read error");
                    sink.add_output(format!("error reading {stream}: {e}"), OutputStream::System);

                    errors += 1;
                    if errors >= MAX_READ_ERRORS {
                        break;
                    }
                }
            }
        }

        tracing::debug!(%stream, "output reader done");
    }
}

fn forward(raw: &[u8], stream: OutputStream, sink: &EventSink, gate: &PauseGate) {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\n', '\r']);

    if line.is_empty() {
        return;
    }

    if gate.is_paused() {
        gate.discard();
        return;
    }

    sink.add_output(line, stream);
}
