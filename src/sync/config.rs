use std::time::Duration;

/// Timing and retry policy for the realtime sync stack.
///
/// Defaults mirror the production tuning: 1s reconnect base with a cap of 5
/// attempts, 1s resubscribe delay, progressive 1s/3s/5s recovery delays with
/// 3 retries, a 2s settle before critical restarts, and a 2s resume debounce.
#[derive(Debug, Clone)]
pub struct RealtimeSyncConfig {
    /// Base delay for channel-service reconnects; doubled per attempt.
    pub reconnect_base_delay: Duration,
    /// Reconnect attempts before the channel service stops retrying on its own.
    pub max_reconnect_attempts: u32,
    /// Fixed delay before a failed subscription is re-created.
    pub resubscribe_delay: Duration,
    /// Recovery attempts per reported error before escalation.
    pub max_retries: u32,
    /// Progressive recovery delays; the last value is reused for any further attempts.
    pub retry_delays: Vec<Duration>,
    /// Settle delay between stopping everything and a full restart.
    pub critical_settle_delay: Duration,
    /// Debounce before a paused sync stack resumes.
    pub resume_debounce: Duration,
    /// Gap between the pause and resume halves of a forced resync.
    pub force_resync_gap: Duration,
}

impl Default for RealtimeSyncConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay: Duration::from_secs(1),
            max_reconnect_attempts: 5,
            resubscribe_delay: Duration::from_secs(1),
            max_retries: 3,
            retry_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(5),
            ],
            critical_settle_delay: Duration::from_secs(2),
            resume_debounce: Duration::from_secs(2),
            force_resync_gap: Duration::from_secs(1),
        }
    }
}

impl RealtimeSyncConfig {
    /// Recovery delay for the given zero-based attempt index.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.retry_delays
            .get(attempt as usize)
            .or_else(|| self.retry_delays.last())
            .copied()
            .unwrap_or(Duration::from_secs(1))
    }
}
