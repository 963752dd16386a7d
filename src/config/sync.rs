//! Sync tuning with presets and builder
//!
//! Bundles the retry ceiling for queued actions with the channel's reconnect
//! backoff and the polling/probe cadence.

use crate::channel::{BackoffError, BackoffTable, ChannelOptions, DEFAULT_BACKOFF_MS};
use crate::queue::DEFAULT_MAX_RETRIES;
use anyhow::{Result, bail};
use std::time::Duration;

/// Timing and retry policy for one deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub max_retries: u32,
    pub backoff: Vec<Duration>,
    pub poll_interval: Duration,
    pub probe_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: millis(&DEFAULT_BACKOFF_MS),
            poll_interval: Duration::from_secs(10),
            probe_interval: Duration::from_secs(5),
        }
    }
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::new()
    }

    /// Tablets on cellular links: slower reconnects, more patience
    pub fn cellular() -> Self {
        Self {
            max_retries: 8,
            backoff: millis(&[2_000, 5_000, 10_000, 30_000, 60_000]),
            poll_interval: Duration::from_secs(30),
            probe_interval: Duration::from_secs(15),
        }
    }

    /// Local backend, fast feedback
    pub fn development() -> Self {
        Self {
            max_retries: 3,
            backoff: millis(&[200, 500, 1_000, 2_000]),
            poll_interval: Duration::from_secs(2),
            probe_interval: Duration::from_secs(1),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            bail!("max_retries must be at least 1");
        }
        if self.poll_interval.is_zero() {
            bail!("poll interval must be greater than zero");
        }
        if self.probe_interval.is_zero() {
            bail!("probe interval must be greater than zero");
        }
        self.backoff_table()?;
        Ok(())
    }

    pub fn backoff_table(&self) -> Result<BackoffTable, BackoffError> {
        BackoffTable::new(self.backoff.clone())
    }

    pub fn channel_options(&self) -> Result<ChannelOptions> {
        Ok(ChannelOptions {
            backoff: self.backoff_table()?,
            poll_interval: self.poll_interval,
            ..Default::default()
        })
    }
}

fn millis(values: &[u64]) -> Vec<Duration> {
    values.iter().copied().map(Duration::from_millis).collect()
}

/// Builder for SyncConfig
#[derive(Debug)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    /// Start from a preset instead of the defaults
    pub fn preset(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn backoff(mut self, delays: Vec<Duration>) -> Self {
        self.config.backoff = delays;
        self
    }

    pub fn backoff_ms(mut self, delays: &[u64]) -> Self {
        self.config.backoff = millis(delays);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.config.probe_interval = interval;
        self
    }

    /// Build and validate
    pub fn build(self) -> Result<SyncConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for SyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
