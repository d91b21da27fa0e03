//! Concurrency control: bounded slot pools for downloads and decodes,
//! resized at runtime from measured throughput.
//!
//! Slots are semaphore permits wrapped in RAII guards, so a slot is
//! released when its pipeline stage finishes on any path. In-flight and
//! peak gauges ride alongside the semaphore for stats and tests.

mod throughput;

pub use throughput::ThroughputMonitor;

use crate::config::LoaderConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

/// Hard ceiling on download slots regardless of measured throughput.
pub const DEFAULT_DOWNLOAD_CEILING: usize = 16;

/// Floor on download slots so a throughput stall never starves the pipeline.
pub const MIN_DOWNLOAD_SLOTS: usize = 2;

#[derive(Debug, Default)]
struct Gauges {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// A bounded pool of pipeline slots, resizable while in use.
#[derive(Debug)]
pub struct SlotPool {
    semaphore: Arc<Semaphore>,
    target: AtomicUsize,
    gauges: Arc<Gauges>,
}

impl SlotPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            target: AtomicUsize::new(capacity),
            gauges: Arc::new(Gauges::default()),
        }
    }

    /// Waits for a free slot. The returned guard releases it on drop.
    pub async fn acquire(&self) -> Result<SlotGuard, crate::error::LoadError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| crate::error::LoadError::Internal("slot pool closed".to_string()))?;

        let gauges = Arc::clone(&self.gauges);
        let current = gauges.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        gauges.peak.fetch_max(current, Ordering::SeqCst);

        Ok(SlotGuard {
            _permit: permit,
            gauges,
        })
    }

    /// Moves the pool toward `new_target`. Growth takes effect at once;
    /// shrinkage retires permits as current holders release them.
    pub fn resize(&self, new_target: usize) {
        let old = self.target.swap(new_target, Ordering::SeqCst);
        if new_target > old {
            self.semaphore.add_permits(new_target - old);
        } else if new_target < old {
            let excess = (old - new_target) as u32;
            let semaphore = Arc::clone(&self.semaphore);
            tokio::spawn(async move {
                if let Ok(permits) = semaphore.acquire_many_owned(excess).await {
                    permits.forget();
                }
            });
        }
    }

    pub fn target(&self) -> usize {
        self.target.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.gauges.in_flight.load(Ordering::SeqCst)
    }

    /// Highest concurrent occupancy observed over the pool's lifetime.
    pub fn peak(&self) -> usize {
        self.gauges.peak.load(Ordering::SeqCst)
    }
}

/// RAII slot, held for the duration of one pipeline stage.
pub struct SlotGuard {
    _permit: OwnedSemaphorePermit,
    gauges: Arc<Gauges>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.gauges.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns the download and decode pools plus the throughput monitor, and
/// retunes the download pool from measured transfer speed.
#[derive(Debug)]
pub struct ConcurrencyGovernor {
    downloads: SlotPool,
    decodes: SlotPool,
    monitor: ThroughputMonitor,
    download_ceiling: usize,
    cores: usize,
}

impl ConcurrencyGovernor {
    pub fn new(config: &LoaderConfig) -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let ceiling = config.download_ceiling;
        let downloads = config
            .download_slots
            .unwrap_or_else(|| (2 * cores).min(ceiling))
            .max(MIN_DOWNLOAD_SLOTS);
        let decodes = config.decode_slots.unwrap_or(cores).max(1);

        debug!(downloads, decodes, ceiling, cores, "concurrency pools sized");
        Self {
            downloads: SlotPool::new(downloads),
            decodes: SlotPool::new(decodes),
            monitor: ThroughputMonitor::new(),
            download_ceiling: ceiling,
            cores,
        }
    }

    pub async fn acquire_download(&self) -> Result<SlotGuard, crate::error::LoadError> {
        self.downloads.acquire().await
    }

    pub async fn acquire_decode(&self) -> Result<SlotGuard, crate::error::LoadError> {
        self.decodes.acquire().await
    }

    pub fn monitor(&self) -> &ThroughputMonitor {
        &self.monitor
    }

    pub fn download_pool(&self) -> &SlotPool {
        &self.downloads
    }

    pub fn decode_pool(&self) -> &SlotPool {
        &self.decodes
    }

    /// Resizes the download pool from the throughput observed since the
    /// last retune: two slots per measured MB/s, clamped between the floor
    /// and `min(2 * cores, ceiling)`. Holds the current size when nothing
    /// completed in the window. Returns the target after retuning.
    pub fn retune(&self) -> usize {
        let current = self.downloads.target();
        let Some(mbps) = self.monitor.sample_mbps() else {
            return current;
        };

        let upper = (2 * self.cores).min(self.download_ceiling);
        let proposed = (mbps * 2.0).ceil() as usize;
        let target = proposed.clamp(MIN_DOWNLOAD_SLOTS, upper);

        if target != current {
            info!(mbps = format!("{:.2}", mbps), current, target, "retuning download slots");
            self.downloads.resize(target);
        }
        target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config_with_slots(downloads: usize, decodes: usize) -> LoaderConfig {
        LoaderConfig::default()
            .with_download_slots(downloads)
            .with_decode_slots(decodes)
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency() {
        let pool = SlotPool::new(2);
        let a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.in_flight(), 2);

        // Third acquire must wait until a slot frees.
        let third = tokio::time::timeout(Duration::from_millis(20), pool.acquire()).await;
        assert!(third.is_err());

        drop(a);
        let _c = tokio::time::timeout(Duration::from_millis(100), pool.acquire())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pool.peak(), 2);
    }

    #[tokio::test]
    async fn test_resize_grow_takes_effect_immediately() {
        let pool = SlotPool::new(1);
        let _a = pool.acquire().await.unwrap();
        pool.resize(2);
        let _b = tokio::time::timeout(Duration::from_millis(100), pool.acquire())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pool.target(), 2);
    }

    #[tokio::test]
    async fn test_resize_shrink_retires_permits() {
        let pool = SlotPool::new(4);
        pool.resize(1);
        tokio::task::yield_now().await;

        let _a = pool.acquire().await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(20), pool.acquire()).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_retune_scales_with_throughput() {
        let governor = ConcurrencyGovernor::new(&config_with_slots(4, 1));
        governor
            .monitor()
            .record(3 * 1024 * 1024, Duration::from_secs(1));

        let target = governor.retune();
        // 3 MB/s doubles to 6 slots unless the core count clamps lower.
        let upper = (2 * governor.cores).min(governor.download_ceiling);
        assert_eq!(target, 6usize.clamp(MIN_DOWNLOAD_SLOTS, upper));
    }

    #[tokio::test]
    async fn test_retune_without_samples_holds_current() {
        let governor = ConcurrencyGovernor::new(&config_with_slots(5, 1));
        assert_eq!(governor.retune(), 5);
    }

    #[tokio::test]
    async fn test_retune_clamps_to_floor() {
        let governor = ConcurrencyGovernor::new(&config_with_slots(8, 1));
        governor.monitor().record(1024, Duration::from_secs(10));
        assert_eq!(governor.retune(), MIN_DOWNLOAD_SLOTS);
    }
}
