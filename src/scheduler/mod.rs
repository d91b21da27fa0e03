//! Request scheduling: the public entry point of the engine.
//!
//! A [`Scheduler`] owns the priority queue, the coalescer, the cache, and
//! the concurrency governor, and drives a background dispatch loop that is
//! woken per enqueue rather than polled. Two dispatch modes are supported:
//!
//! * [`DispatchMode::Balanced`] streams each request through download and
//!   decode independently, overlapping the stages across requests.
//! * [`DispatchMode::Eager`] drains the queue as a batch, finishes every
//!   download before starting any decode, and resolves the whole batch
//!   together once all decodes land.

mod coalesce;
mod pipeline;

pub use coalesce::{CoalescerStats, LoadOutcome};

use crate::cache::{AssetCache, CacheStats, OwnerHandle, UnloadHook};
use crate::config::LoaderConfig;
use crate::decoder::{AssetKind, AudioTransport, DecodeConfig, DecoderRegistry, NoAudioTransport};
use crate::downloader::{Downloader, RetryPolicy};
use crate::error::LoadError;
use crate::governor::ConcurrencyGovernor;
use crate::queue::PriorityQueue;
use crate::request::{AssetKey, GroupId, Request, RequestId};
use coalesce::{Registration, RequestCoalescer};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// How the dispatch loop moves requests through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Batch mode: all downloads, then all decodes, then the whole batch
    /// resolves at once.
    Eager,
    /// Streaming mode: each request flows through both stages on its own.
    Balanced,
}

pub(crate) struct SchedulerInner<D, A> {
    pub(crate) downloader: D,
    pub(crate) audio: A,
    pub(crate) registry: DecoderRegistry,
    pub(crate) cache: AssetCache,
    pub(crate) coalescer: RequestCoalescer,
    pub(crate) governor: ConcurrencyGovernor,
    pub(crate) queue: Mutex<PriorityQueue<Request>>,
    pub(crate) wake: Notify,
    pub(crate) mode: Mutex<DispatchMode>,
    pub(crate) group: Mutex<GroupId>,
    pub(crate) retry: RetryPolicy,
    pub(crate) shutdown: tokio_util::sync::CancellationToken,
}

/// Priority-ordered resource loading engine.
///
/// Must be constructed on a tokio runtime; construction spawns the
/// dispatch and retune loops. Dropping the scheduler cancels both and
/// resolves any queued requests as [`LoadError::Cancelled`].
pub struct Scheduler<D: Downloader, A: AudioTransport = NoAudioTransport> {
    inner: Arc<SchedulerInner<D, A>>,
}

impl<D: Downloader> Scheduler<D, NoAudioTransport> {
    /// A scheduler without audio support; audio requests fail with a
    /// permanent download error.
    pub fn new(downloader: D, registry: DecoderRegistry, config: LoaderConfig) -> Self {
        Self::with_audio(downloader, NoAudioTransport, registry, config)
    }
}

impl<D: Downloader, A: AudioTransport> Scheduler<D, A> {
    pub fn with_audio(
        downloader: D,
        audio: A,
        registry: DecoderRegistry,
        config: LoaderConfig,
    ) -> Self {
        let governor = ConcurrencyGovernor::new(&config);
        let inner = Arc::new(SchedulerInner {
            downloader,
            audio,
            registry,
            cache: AssetCache::new(),
            coalescer: RequestCoalescer::new(),
            governor,
            queue: Mutex::new(PriorityQueue::new()),
            wake: Notify::new(),
            mode: Mutex::new(config.initial_mode),
            group: Mutex::new(GroupId::default_group()),
            retry: config.retry.clone(),
            shutdown: tokio_util::sync::CancellationToken::new(),
        });

        tokio::spawn(dispatch_loop(Arc::clone(&inner)));
        tokio::spawn(retune_loop(Arc::clone(&inner), config.retune_interval));

        info!(mode = ?config.initial_mode, "scheduler started");
        Self { inner }
    }

    /// Requests an asset in the currently selected group. Resolves from
    /// cache when possible, coalesces onto an in-flight pipeline for the
    /// same key, and otherwise enqueues at `priority`.
    pub async fn request(
        &self,
        kind: AssetKind,
        key: impl Into<AssetKey>,
        priority: i32,
        config: DecodeConfig,
    ) -> LoadOutcome {
        let group = self.inner.group.lock().unwrap().clone();
        self.request_in(group, kind, key, priority, config).await
    }

    /// Like [`Scheduler::request`] but with an explicit group, bypassing
    /// the selected one.
    pub async fn request_in(
        &self,
        group: GroupId,
        kind: AssetKind,
        key: impl Into<AssetKey>,
        priority: i32,
        config: DecodeConfig,
    ) -> LoadOutcome {
        let key = key.into();
        if self.inner.shutdown.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        if let Some(asset) = self.inner.cache.get(&group, &key) {
            return Ok(asset);
        }

        match self.inner.coalescer.register(&group, &key).await {
            Registration::Waiter(receiver) => recv_outcome(receiver).await,
            Registration::Primary(receiver) => {
                let request = Request {
                    id: RequestId::next(),
                    key,
                    kind,
                    priority,
                    group,
                    config,
                };
                debug!(id = %request.id, key = %request.key, priority, "enqueued");
                self.inner.queue.lock().unwrap().enqueue(request);
                self.inner.wake.notify_one();
                recv_outcome(receiver).await
            }
        }
    }

    /// Switches dispatch mode. Takes effect from the next wake of the
    /// dispatch loop; in-flight work is unaffected.
    pub fn set_mode(&self, mode: DispatchMode) {
        let mut current = self.inner.mode.lock().unwrap();
        if *current != mode {
            info!(from = ?*current, to = ?mode, "dispatch mode changed");
            *current = mode;
        }
    }

    pub fn mode(&self) -> DispatchMode {
        *self.inner.mode.lock().unwrap()
    }

    /// Selects the group stamped onto subsequent requests. Requests
    /// already in flight keep the group they were enqueued under, so a
    /// switch never redirects their cache writes; a warning is logged when
    /// that situation arises.
    pub async fn set_group(&self, group: impl Into<GroupId>) {
        let group = group.into();
        let in_flight = self.inner.coalescer.in_flight_count().await;
        if in_flight > 0 {
            warn!(
                %group,
                in_flight,
                "group switched with requests in flight; their results stay in the old group"
            );
        }
        *self.inner.group.lock().unwrap() = group;
    }

    pub fn current_group(&self) -> GroupId {
        self.inner.group.lock().unwrap().clone()
    }

    /// Evicts every cached asset in `group`. Returns the eviction count.
    pub fn release_group(&self, group: &GroupId) -> usize {
        self.inner.cache.release_group(group)
    }

    /// Evicts one cached asset. Returns true if it was present.
    pub fn release_asset(&self, group: &GroupId, key: &AssetKey) -> bool {
        self.inner.cache.release_asset(group, key)
    }

    /// Evicts the entire cache across all groups.
    pub fn release_all(&self) -> usize {
        self.inner.cache.release_all()
    }

    /// Byte total of the size hints cached under `group`.
    pub fn group_size_bytes(&self, group: &GroupId) -> u64 {
        self.inner.cache.group_size_bytes(group)
    }

    pub fn register_owner(&self) -> OwnerHandle {
        self.inner.cache.register_owner()
    }

    /// Records `owner` as holding the cached entry, keeping it alive past
    /// other owners' releases.
    pub fn claim(&self, owner: OwnerHandle, group: &GroupId, key: &AssetKey) -> bool {
        self.inner.cache.claim(owner, group, key)
    }

    pub fn release_owner(&self, owner: OwnerHandle) {
        self.inner.cache.release_owner(owner)
    }

    pub fn set_unload_hook(&self, hook: Arc<dyn UnloadHook>) {
        self.inner.cache.set_unload_hook(hook)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub async fn coalescer_stats(&self) -> CoalescerStats {
        self.inner.coalescer.stats().await
    }

    pub fn governor(&self) -> &ConcurrencyGovernor {
        &self.inner.governor
    }

    /// Stops the dispatch and retune loops. Queued requests resolve as
    /// [`LoadError::Cancelled`]; requests mid-pipeline observe the
    /// cancellation at their next stage boundary.
    pub fn shutdown(&self) {
        info!("scheduler shutting down");
        self.inner.shutdown.cancel();
        self.inner.wake.notify_one();
    }
}

impl<D: Downloader, A: AudioTransport> Drop for Scheduler<D, A> {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
        self.inner.wake.notify_one();
    }
}

async fn recv_outcome(mut receiver: broadcast::Receiver<LoadOutcome>) -> LoadOutcome {
    match receiver.recv().await {
        Ok(outcome) => outcome,
        Err(_) => Err(LoadError::Internal("result channel closed".to_string())),
    }
}

async fn dispatch_loop<D: Downloader, A: AudioTransport>(inner: Arc<SchedulerInner<D, A>>) {
    loop {
        tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            _ = inner.wake.notified() => {}
        }
        let mode = *inner.mode.lock().unwrap();
        match mode {
            DispatchMode::Balanced => pipeline::run_balanced(&inner).await,
            DispatchMode::Eager => pipeline::run_eager(&inner).await,
        }
    }
    drain_cancelled(&inner).await;
    debug!("dispatch loop stopped");
}

/// Resolves everything still queued at shutdown so no waiter hangs.
async fn drain_cancelled<D: Downloader, A: AudioTransport>(inner: &Arc<SchedulerInner<D, A>>) {
    let pending = inner.queue.lock().unwrap().drain();
    for request in pending {
        inner
            .coalescer
            .resolve(&request.group, &request.key, Err(LoadError::Cancelled))
            .await;
    }
}

async fn retune_loop<D: Downloader, A: AudioTransport>(
    inner: Arc<SchedulerInner<D, A>>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            _ = ticker.tick() => {
                inner.governor.retune();
            }
        }
    }
}
