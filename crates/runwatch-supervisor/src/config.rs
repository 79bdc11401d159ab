use std::time::Duration;

/// Tuning of a [Supervisor](crate::Supervisor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Time given to the worker's process tree to exit after the graceful
    /// termination signal, before it is killed.
    pub stop_timeout: Duration,

    /// Time between two reads of the trace channel once its end is reached.
    pub poll_interval: Duration,

    /// Time the output readers keep draining pipes after the worker exited.
    pub drain_timeout: Duration,

    /// Number of attempts at opening the trace channel.
    pub channel_retries: u32,

    /// Time between two attempts at opening the trace channel.
    pub channel_retry_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(50),
            drain_timeout: Duration::from_millis(500),
            channel_retries: 30,
            channel_retry_interval: Duration::from_millis(200),
        }
    }
}
