use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use runwatch_collector::{Collector, OutputStream};
use runwatch_supervisor::{Supervisor, SupervisorConfig, WorkerCommand};
use tempfile::TempDir;

pub struct Fixture {
    pub dir: TempDir,
    pub supervisor: Supervisor,
}

impl Fixture {
    /// Prepares a supervisor of a shell script with the given body.
    pub fn new(body: &str) -> Self {
        Self::with_config(body, test_config())
    }

    pub fn with_config(body: &str, config: SupervisorConfig) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("main.sh");
        std::fs::write(&script, body).expect("write script");

        let command = WorkerCommand::new(&script).interpreter("/bin/sh");
        let supervisor = Supervisor::new(command, config, Arc::new(Collector::new()));

        Self { dir, supervisor }
    }

    pub fn collector(&self) -> &Arc<Collector> {
        self.supervisor.collector()
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Returns the recorded lines of the given stream.
    pub fn lines(&self, stream: OutputStream) -> Vec<String> {
        self.collector()
            .output()
            .into_iter()
            .filter(|line| line.stream == stream)
            .map(|line| line.content)
            .collect()
    }

    pub async fn wait_for_line(&self, stream: OutputStream, content: &str) {
        eventually(|| self.lines(stream).iter().any(|line| line.contains(content))).await;
    }
}

pub fn test_config() -> SupervisorConfig {
    SupervisorConfig {
        stop_timeout: Duration::from_secs(1),
        poll_interval: Duration::from_millis(10),
        drain_timeout: Duration::from_millis(200),
        channel_retries: 100,
        channel_retry_interval: Duration::from_millis(20),
    }
}

/// Waits until `check` holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

pub fn touch(path: &Path) {
    std::fs::write(path, b"").expect("touch");
}
