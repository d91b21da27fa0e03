//! Error types for the loading engine.
//!
//! Failures are local to a single request's pipeline: they resolve that
//! request's waiters and never abort the dispatch loop or sibling pipelines.

use crate::decoder::AssetKind;
use thiserror::Error;

/// Errors delivered to a request's waiters.
///
/// Cloneable because a single outcome is broadcast to every coalesced
/// waiter for the same key.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    /// Every retry attempt was exhausted (or a permanent error observed).
    #[error("download failed for {key} after {attempts} attempts: {last_error}")]
    DownloadFailed {
        key: String,
        attempts: u32,
        last_error: String,
    },

    /// The decoder rejected a successfully downloaded payload.
    #[error("decode failed for {key} ({kind}): {message}")]
    Decode {
        key: String,
        kind: AssetKind,
        message: String,
    },

    /// No decoder is registered for the requested kind.
    #[error("no decoder registered for kind {0}")]
    NoDecoder(AssetKind),

    /// The request observed shutdown before completing.
    #[error("request cancelled")]
    Cancelled,

    /// Internal error (result channel closed, decode task panicked).
    #[error("internal error: {0}")]
    Internal(String),
}
