//! Transfer throughput measurement feeding the adaptive retune loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default, Clone, Copy)]
struct Window {
    bytes: u64,
    busy: Duration,
}

/// Accumulates completed-transfer sizes and durations. The retune loop
/// drains the current window with [`ThroughputMonitor::sample_mbps`]; the
/// lifetime byte total stays available for stats.
#[derive(Debug, Default)]
pub struct ThroughputMonitor {
    total_bytes: AtomicU64,
    window: Mutex<Window>,
}

impl ThroughputMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one completed transfer.
    pub fn record(&self, bytes: u64, elapsed: Duration) {
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
        let mut window = self.window.lock().unwrap();
        window.bytes += bytes;
        window.busy += elapsed;
    }

    /// Bytes transferred over the monitor's lifetime.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Megabytes per second over the window since the last sample, then
    /// resets the window. Returns `None` when nothing completed in the
    /// window, so callers can hold their current tuning instead of
    /// collapsing to zero.
    pub fn sample_mbps(&self) -> Option<f64> {
        let window = {
            let mut guard = self.window.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        if window.bytes == 0 || window.busy.is_zero() {
            return None;
        }
        let megabytes = window.bytes as f64 / (1024.0 * 1024.0);
        Some(megabytes / window.busy.as_secs_f64())
    }
}
