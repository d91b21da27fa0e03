//! Engine configuration.

use crate::downloader::RetryPolicy;
use crate::governor::DEFAULT_DOWNLOAD_CEILING;
use crate::scheduler::DispatchMode;
use std::time::Duration;

/// Tunables for a [`Scheduler`](crate::Scheduler), built up in the
/// `Default` plus `with_*` style.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Initial download slots. Defaults to `min(2 * cores, ceiling)`.
    pub download_slots: Option<usize>,
    /// Decode slots. Defaults to the core count.
    pub decode_slots: Option<usize>,
    /// Hard upper bound the retune loop never exceeds.
    pub download_ceiling: usize,
    /// Retry schedule applied to every download.
    pub retry: RetryPolicy,
    /// How often the governor resizes the download pool from throughput.
    pub retune_interval: Duration,
    /// Dispatch mode the scheduler starts in.
    pub initial_mode: DispatchMode,
    /// Connect timeout for the built-in HTTP downloader.
    pub connect_timeout: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            download_slots: None,
            decode_slots: None,
            download_ceiling: DEFAULT_DOWNLOAD_CEILING,
            retry: RetryPolicy::default(),
            retune_interval: Duration::from_secs(5),
            initial_mode: DispatchMode::Balanced,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl LoaderConfig {
    pub fn with_download_slots(mut self, slots: usize) -> Self {
        self.download_slots = Some(slots);
        self
    }

    pub fn with_decode_slots(mut self, slots: usize) -> Self {
        self.decode_slots = Some(slots);
        self
    }

    pub fn with_download_ceiling(mut self, ceiling: usize) -> Self {
        self.download_ceiling = ceiling;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_retune_interval(mut self, interval: Duration) -> Self {
        self.retune_interval = interval;
        self
    }

    pub fn with_initial_mode(mut self, mode: DispatchMode) -> Self {
        self.initial_mode = mode;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::default();
        assert_eq!(config.download_ceiling, DEFAULT_DOWNLOAD_CEILING);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.initial_mode, DispatchMode::Balanced);
        assert!(config.download_slots.is_none());
    }

    #[test]
    fn test_builder_overrides() {
        let config = LoaderConfig::default()
            .with_download_slots(3)
            .with_download_ceiling(8)
            .with_initial_mode(DispatchMode::Eager);
        assert_eq!(config.download_slots, Some(3));
        assert_eq!(config.download_ceiling, 8);
        assert_eq!(config.initial_mode, DispatchMode::Eager);
    }
}
