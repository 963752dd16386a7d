//! Fixed reconnect delay table

use std::time::Duration;

/// Default reconnect delays: 1s, 2s, 5s, 10s, then 30s forever
pub const DEFAULT_BACKOFF_MS: [u64; 5] = [1_000, 2_000, 5_000, 10_000, 30_000];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    #[error("backoff table must contain at least one delay")]
    Empty,
    #[error("backoff table must not decrease (entry {index} is shorter than the one before it)")]
    Decreasing { index: usize },
}

/// Ascending sequence of reconnect delays indexed by a saturating attempt counter
///
/// Attempts past the end of the table reuse the last entry, so the delay
/// never decreases and never exceeds the final value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffTable {
    delays: Vec<Duration>,
}

impl BackoffTable {
    pub fn new(delays: Vec<Duration>) -> Result<Self, BackoffError> {
        if delays.is_empty() {
            return Err(BackoffError::Empty);
        }
        if let Some(index) = delays.windows(2).position(|w| w[1] < w[0]) {
            return Err(BackoffError::Decreasing { index: index + 1 });
        }
        Ok(Self { delays })
    }

    pub fn from_millis(delays: &[u64]) -> Result<Self, BackoffError> {
        Self::new(delays.iter().copied().map(Duration::from_millis).collect())
    }

    /// Delay before reconnect attempt number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let index = (attempt as usize).min(self.delays.len() - 1);
        self.delays[index]
    }

    pub fn max_delay(&self) -> Duration {
        self.delays[self.delays.len() - 1]
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

impl Default for BackoffTable {
    fn default() -> Self {
        Self {
            delays: DEFAULT_BACKOFF_MS.iter().copied().map(Duration::from_millis).collect(),
        }
    }
}
