//! AssetStream - concurrent, priority-ordered resource loading and caching.
//!
//! This library downloads byte payloads from network locations, decodes them
//! into typed in-memory assets through a pluggable decoder registry, caches
//! the results per logical asset group, and fans completion out to every
//! waiting caller.
//!
//! # Architecture
//!
//! ```text
//! request() → cache check → [hit] → Asset
//!                         → [miss] → RequestCoalescer → PriorityQueue
//!                                         │
//!                                         ▼
//!            Scheduler tick → Download (download slots, retry/backoff)
//!                           → Decode   (decode slots, blocking pool)
//!                           → AssetCache insert → fan-out to all waiters
//! ```
//!
//! # Request Coalescing
//!
//! Concurrent requests for the same key share one in-flight pipeline: only
//! one fetch and one decode run, and every waiter receives the same result.
//!
//! # Dispatch Modes
//!
//! The scheduler drains the queue in one of two modes:
//!
//! - [`DispatchMode::Eager`] - all downloads in a batch complete before any
//!   decode starts, and callbacks fire as one batch at the end.
//! - [`DispatchMode::Balanced`] - each request runs download and decode as
//!   one pipeline, resolving its waiters as soon as it finishes.
//!
//! # Example
//!
//! ```ignore
//! use assetstream::{
//!     AssetKind, DecodeConfig, DecoderRegistry, HttpDownloader, LoaderConfig, Scheduler,
//! };
//!
//! let config = LoaderConfig::default();
//! let downloader = HttpDownloader::new(config.connect_timeout)?;
//! let scheduler = Scheduler::new(downloader, DecoderRegistry::with_defaults(), config);
//!
//! let asset = scheduler
//!     .request(AssetKind::Json, "https://cdn.example.com/config.json", 5, DecodeConfig::default())
//!     .await?;
//! ```

pub mod cache;
pub mod config;
pub mod decoder;
pub mod downloader;
pub mod error;
pub mod governor;
pub mod logging;
pub mod manifest;
pub mod queue;
pub mod request;
pub mod scheduler;

pub use cache::{AssetCache, CacheStats, OwnerHandle, UnloadHook};
pub use config::LoaderConfig;
pub use decoder::{
    Asset, AssetKind, AudioTransport, DecodeConfig, DecodeError, Decoder, DecoderRegistry,
    NoAudioTransport,
};
pub use downloader::{Downloader, FetchError, HttpDownloader, RetryPolicy};
pub use error::LoadError;
pub use manifest::{AssetManifest, ManifestEntry, ManifestError};
pub use queue::{EmptyQueueError, Prioritized, PriorityQueue};
pub use request::{AssetKey, GroupId, Request, RequestId};
pub use scheduler::{CoalescerStats, DispatchMode, Scheduler};

/// Version of the AssetStream library.
///
/// Defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
