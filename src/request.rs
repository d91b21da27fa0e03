//! Request identity types and the queued request record.

use crate::decoder::{AssetKind, DecodeConfig};
use crate::queue::Prioritized;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Canonical identity of an asset: its absolute source URL.
///
/// Cheap to clone; interned behind an `Arc<str>` because the same key is
/// held by the queue, the coalescer table, and the cache simultaneously.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetKey(Arc<str>);

impl AssetKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AssetKey {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for AssetKey {
    fn from(s: String) -> Self {
        Self(Arc::from(s.as_str()))
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cache partition label. Requests stamped with different groups never
/// share cache entries or in-flight work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(Arc<str>);

impl GroupId {
    /// The group used when no explicit group has been selected.
    pub fn default_group() -> Self {
        Self(Arc::from("default"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for GroupId {
    fn from(s: String) -> Self {
        Self(Arc::from(s.as_str()))
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monotonic per-process request identifier, used for logging and as the
/// deterministic tie-break between equal-priority queue entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

impl RequestId {
    pub fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// A queued load request. The group is stamped at enqueue time so later
/// group switches never redirect an in-flight request's cache writes.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub key: AssetKey,
    pub kind: AssetKind,
    pub priority: i32,
    pub group: GroupId,
    pub config: DecodeConfig,
}

impl Prioritized for Request {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn sequence(&self) -> u64 {
        self.id.as_u64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_key_equality_and_display() {
        let a: AssetKey = "https://cdn.example.com/x.json".into();
        let b: AssetKey = String::from("https://cdn.example.com/x.json").into();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "https://cdn.example.com/x.json");
    }

    #[test]
    fn test_request_ids_are_monotonic() {
        let a = RequestId::next();
        let b = RequestId::next();
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_default_group_label() {
        assert_eq!(GroupId::default_group().as_str(), "default");
    }
}
