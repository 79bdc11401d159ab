//! Follower of the trace channel.
//!
//! The worker appends one JSON record per line to the channel. The tailer
//! keeps reading past the end of the file until the worker exits (or the
//! supervisor stops it), then removes the channel.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use runwatch_collector::EventSink;
use runwatch_protocol::TraceRecord;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

pub(crate) struct TraceTailer {
    pub path: PathBuf,
    pub sink: EventSink,
    pub shutdown: CancellationToken,
    pub exited: CancellationToken,
    pub poll_interval: Duration,
    pub retries: u32,
    pub retry_interval: Duration,
}

impl TraceTailer {
    pub async fn run(self) {
        if let Some(file) = self.open().await {
            self.follow(file).await;
        }

        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => tracing::debug!(path = %self.path.display(), "trace channel removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => (),
            Err(e) => tracing::warn!(error = %e, path = %self.path.display(), "remove trace channel"),
        }
    }

    /// Opens the channel, which the worker creates at some point after it
    /// started.
    async fn open(&self) -> Option<File> {
        for attempt in 1..=self.retries {
            match File::open(&self.path).await {
                Ok(file) => {
                    tracing::debug!(attempt, path = %self.path.display(), "trace channel opened");
                    return Some(file);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    if self.exited.is_cancelled() {
                        tracing::debug!("worker exited without opening the trace channel");
                        return None;
                    }

                    tokio::select! {
                        _ = self.shutdown.cancelled() => return None,
                        _ = self.exited.cancelled() => (),
                        _ = tokio::time::sleep(self.retry_interval) => (),
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, path = %self.path.display(), "cannot open trace channel");
                    return None;
                }
            }
        }

        tracing::warn!(
            retries = self.retries,
            path = %self.path.display(),
            "trace channel unavailable, no trace events will be collected"
        );

        None
    }

    async fn follow(&self, file: File) {
        let mut reader = BufReader::new(file);
        let mut line = Vec::new();

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            // an exit observed before the read guarantees it sees every record
            let exited = self.exited.is_cancelled();

            // partial lines stay in the buffer until completed
            match reader.read_until(b'\n', &mut line).await {
                Ok(_) if line.ends_with(b"\n") => {
                    self.dispatch(&line);
                    line.clear();
                    continue;
                }
                Ok(_) => (),
                Err(e) => {
                    tracing::warn!(error = %e, "trace channel read error");
                    break;
                }
            }

            if exited {
                // last record, not newline-terminated
                if !line.is_empty() {
                    self.dispatch(&line);
                }
                break;
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.exited.cancelled() => (),
                _ = tokio::time::sleep(self.poll_interval) => (),
            }
        }

        tracing::debug!("trace channel closed");
    }

    fn dispatch(&self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw);

        if line.trim().is_empty() {
            return;
        }

        match TraceRecord::parse_line(&line) {
            Ok(record) => {
                self.sink.add_record(record);
            }
            Err(e) => tracing::warn!(error = %e, line = line.trim_end(), "malformed trace record skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use runwatch_collector::Collector;
    use tokio_util::sync::CancellationToken;

    use super::TraceTailer;

    fn tailer(path: std::path::PathBuf, collector: &Arc<Collector>) -> TraceTailer {
        TraceTailer {
            path,
            sink: collector.sink(),
            shutdown: CancellationToken::new(),
            exited: CancellationToken::new(),
            poll_interval: Duration::from_millis(10),
            retries: 3,
            retry_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn exited_worker_is_drained() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");

        std::fs::write(
            &path,
            concat!(
                r#"{"type":"call","function_name":"main","filename":"m.py","line_no":1}"#,
                "\n",
                "not json\n",
                "\n",
                r#"{"type":"return","function_name":"main","return_value":"0"}"#,
            ),
        )
        .unwrap();

        let collector = Arc::new(Collector::new());
        let tailer = tailer(path.clone(), &collector);
        tailer.exited.cancel();
        tailer.run().await;

        assert_eq!(collector.calls().len(), 1);
        assert_eq!(collector.returns().len(), 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn records_written_right_before_exit_are_drained() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"{{"type":"call","function_name":"main","filename":"m.py","line_no":1}}"#
        )
        .unwrap();

        let collector = Arc::new(Collector::new());
        let tailer = tailer(path, &collector);
        let exited = tailer.exited.clone();
        let task = tokio::spawn(tailer.run());

        tokio::time::timeout(Duration::from_secs(5), async {
            while collector.calls().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // the worker's last record, then its exit, while the tailer is idle
        // at the end of the channel
        writeln!(
            file,
            r#"{{"type":"return","function_name":"main","return_value":"0"}}"#
        )
        .unwrap();
        exited.cancel();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(collector.returns().len(), 1);
        assert!(collector.call_stack().is_empty());
    }

    #[tokio::test]
    async fn missing_channel_is_given_up() {
        let dir = tempfile::tempdir().unwrap();

        let collector = Arc::new(Collector::new());
        tailer(dir.path().join("never.jsonl"), &collector).run().await;

        assert_eq!(collector.pending(), 0);
    }
}
