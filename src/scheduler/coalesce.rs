//! Request coalescing: concurrent requests for the same asset share one
//! pipeline execution.
//!
//! The first registration for a `(group, key)` pair becomes the primary
//! and drives the pipeline; later registrations become waiters on the same
//! broadcast channel. Resolution removes the entry, so a request arriving
//! after resolution starts a fresh pipeline.

use crate::decoder::Asset;
use crate::error::LoadError;
use crate::request::{AssetKey, GroupId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

/// Final result delivered to every waiter of one pipeline execution.
pub type LoadOutcome = Result<Asset, LoadError>;

/// Enough capacity for the single resolution message; waiters subscribe
/// before it is sent.
const CHANNEL_CAPACITY: usize = 16;

/// How a registration landed: primary registrations drive the pipeline,
/// waiters only receive the shared outcome.
pub(crate) enum Registration {
    Primary(broadcast::Receiver<LoadOutcome>),
    Waiter(broadcast::Receiver<LoadOutcome>),
}

/// Counters describing coalescer activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoalescerStats {
    /// Pipelines currently registered and unresolved.
    pub in_flight: usize,
    /// Lifetime count of registrations that started a pipeline.
    pub primary: u64,
    /// Lifetime count of requests that piggybacked on an existing pipeline.
    pub coalesced: u64,
}

impl CoalescerStats {
    pub fn total(&self) -> u64 {
        self.primary + self.coalesced
    }

    /// Fraction of registrations saved by coalescing.
    pub fn coalesce_ratio(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.coalesced as f64 / self.total() as f64
        }
    }
}

pub(crate) struct RequestCoalescer {
    inflight: Mutex<HashMap<(GroupId, AssetKey), broadcast::Sender<LoadOutcome>>>,
    primary: AtomicU64,
    coalesced: AtomicU64,
}

impl RequestCoalescer {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
            primary: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }

    /// Joins or starts the pipeline for `(group, key)`.
    pub async fn register(&self, group: &GroupId, key: &AssetKey) -> Registration {
        let mut inflight = self.inflight.lock().await;
        if let Some(sender) = inflight.get(&(group.clone(), key.clone())) {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!(%group, %key, "coalesced onto in-flight request");
            return Registration::Waiter(sender.subscribe());
        }
        let (sender, receiver) = broadcast::channel(CHANNEL_CAPACITY);
        inflight.insert((group.clone(), key.clone()), sender);
        self.primary.fetch_add(1, Ordering::Relaxed);
        Registration::Primary(receiver)
    }

    /// Delivers the outcome to every registered waiter and clears the
    /// entry. A no-op when nothing is registered for the pair.
    pub async fn resolve(&self, group: &GroupId, key: &AssetKey, outcome: LoadOutcome) {
        let sender = {
            let mut inflight = self.inflight.lock().await;
            inflight.remove(&(group.clone(), key.clone()))
        };
        if let Some(sender) = sender {
            // Send fails only when every waiter already dropped.
            let _ = sender.send(outcome);
        }
    }

    /// Number of unresolved pipelines.
    pub async fn in_flight_count(&self) -> usize {
        self.inflight.lock().await.len()
    }

    pub async fn stats(&self) -> CoalescerStats {
        CoalescerStats {
            in_flight: self.inflight.lock().await.len(),
            primary: self.primary.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }
}
