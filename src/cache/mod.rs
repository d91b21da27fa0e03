//! In-memory asset cache, partitioned by group.
//!
//! Entries live until explicitly released: per key, per group, or through
//! owner handles that bulk-release everything an owner claimed. An optional
//! unload hook runs for every evicted entry so hosts can free engine-side
//! resources tied to the asset.

use crate::decoder::Asset;
use crate::request::{AssetKey, GroupId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Callback invoked for each entry evicted from the cache. Runs outside
/// the cache lock, so implementations may call back into the cache.
pub trait UnloadHook: Send + Sync {
    fn on_unload(&self, group: &GroupId, key: &AssetKey, asset: &Asset);
}

/// Identity of a registered asset owner. Cloneable; all clones refer to
/// the same owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerHandle(u64);

/// Cache occupancy and effectiveness counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub groups: usize,
    /// Lifetime count of entries removed through any release path.
    pub evictions: u64,
    /// Sum of the size hints of everything currently cached.
    pub bytes: u64,
}

struct Entry {
    asset: Asset,
    claims: usize,
}

#[derive(Default)]
struct CacheInner {
    groups: HashMap<GroupId, HashMap<AssetKey, Entry>>,
    owners: HashMap<u64, Vec<(GroupId, AssetKey)>>,
}

/// Thread-safe asset cache.
pub struct AssetCache {
    inner: Mutex<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    next_owner: AtomicU64,
    unload_hook: Mutex<Option<Arc<dyn UnloadHook>>>,
}

impl AssetCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            next_owner: AtomicU64::new(1),
            unload_hook: Mutex::new(None),
        }
    }

    /// Installs the eviction callback, replacing any previous one.
    pub fn set_unload_hook(&self, hook: Arc<dyn UnloadHook>) {
        *self.unload_hook.lock().unwrap() = Some(hook);
    }

    /// Looks up an asset, counting the hit or miss.
    pub fn get(&self, group: &GroupId, key: &AssetKey) -> Option<Asset> {
        let inner = self.inner.lock().unwrap();
        let found = inner
            .groups
            .get(group)
            .and_then(|entries| entries.get(key))
            .map(|entry| entry.asset.clone());
        match &found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Inserts an asset. A concurrent duplicate for the same key wins by
    /// arriving last; existing owner claims carry over.
    pub fn put(&self, group: &GroupId, key: &AssetKey, asset: Asset) {
        let mut inner = self.inner.lock().unwrap();
        let entries = inner.groups.entry(group.clone()).or_default();
        match entries.get_mut(key) {
            Some(entry) => {
                debug!(%group, %key, "replacing cached asset");
                entry.asset = asset;
            }
            None => {
                entries.insert(key.clone(), Entry { asset, claims: 0 });
            }
        }
    }

    /// Evicts one entry. Returns true if it was present.
    pub fn release_asset(&self, group: &GroupId, key: &AssetKey) -> bool {
        let evicted = {
            let mut inner = self.inner.lock().unwrap();
            let entry = inner
                .groups
                .get_mut(group)
                .and_then(|entries| entries.remove(key));
            if inner.groups.get(group).is_some_and(|entries| entries.is_empty()) {
                inner.groups.remove(group);
            }
            if entry.is_some() {
                // Claims die with the entry; a later entry under the same
                // key starts unclaimed.
                for claimed in inner.owners.values_mut() {
                    claimed.retain(|(g, k)| !(g == group && k == key));
                }
            }
            entry
        };
        match evicted {
            Some(entry) => {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                self.run_unload_hook(group, key, &entry.asset);
                true
            }
            None => false,
        }
    }

    /// Evicts every entry in a group. Returns how many were evicted.
    pub fn release_group(&self, group: &GroupId) -> usize {
        let evicted = {
            let mut inner = self.inner.lock().unwrap();
            let evicted = inner.groups.remove(group).unwrap_or_default();
            if !evicted.is_empty() {
                for claimed in inner.owners.values_mut() {
                    claimed.retain(|(g, _)| g != group);
                }
            }
            evicted
        };
        let count = evicted.len();
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
        for (key, entry) in &evicted {
            self.run_unload_hook(group, key, &entry.asset);
        }
        if count > 0 {
            debug!(%group, count, "released group");
        }
        count
    }

    /// Evicts everything in every group. Returns how many entries were
    /// evicted.
    pub fn release_all(&self) -> usize {
        let evicted = {
            let mut inner = self.inner.lock().unwrap();
            inner.owners.values_mut().for_each(Vec::clear);
            std::mem::take(&mut inner.groups)
        };
        let count = evicted.values().map(HashMap::len).sum();
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
        for (group, entries) in &evicted {
            for (key, entry) in entries {
                self.run_unload_hook(group, key, &entry.asset);
            }
        }
        if count > 0 {
            debug!(count, "released all cached assets");
        }
        count
    }

    /// Sum of the size hints cached under `group`.
    pub fn group_size_bytes(&self, group: &GroupId) -> u64 {
        let inner = self.inner.lock().unwrap();
        inner
            .groups
            .get(group)
            .map(|entries| {
                entries
                    .values()
                    .filter_map(|entry| entry.asset.size_hint())
                    .map(|size| size as u64)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Registers a new owner whose claims can later be bulk-released.
    pub fn register_owner(&self) -> OwnerHandle {
        let id = self.next_owner.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().unwrap().owners.insert(id, Vec::new());
        OwnerHandle(id)
    }

    /// Records that `owner` holds a reference to a cached entry. Returns
    /// false when the entry or the owner is unknown.
    pub fn claim(&self, owner: OwnerHandle, group: &GroupId, key: &AssetKey) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(entry) = inner
            .groups
            .get_mut(group)
            .and_then(|entries| entries.get_mut(key))
        else {
            return false;
        };
        entry.claims += 1;
        match inner.owners.get_mut(&owner.0) {
            Some(claimed) => {
                claimed.push((group.clone(), key.clone()));
                true
            }
            None => {
                // Unknown owner; undo the claim.
                if let Some(entry) = inner
                    .groups
                    .get_mut(group)
                    .and_then(|entries| entries.get_mut(key))
                {
                    entry.claims -= 1;
                }
                false
            }
        }
    }

    /// Drops every claim the owner holds and evicts entries whose claim
    /// count reaches zero. Entries never claimed by an owner are untouched.
    pub fn release_owner(&self, owner: OwnerHandle) {
        let evicted = {
            let mut inner = self.inner.lock().unwrap();
            let claimed = inner.owners.remove(&owner.0).unwrap_or_default();
            let mut evicted = Vec::new();
            for (group, key) in claimed {
                let Some(entries) = inner.groups.get_mut(&group) else {
                    continue;
                };
                let Some(entry) = entries.get_mut(&key) else {
                    continue;
                };
                entry.claims = entry.claims.saturating_sub(1);
                if entry.claims == 0 {
                    if let Some(entry) = entries.remove(&key) {
                        evicted.push((group.clone(), key, entry.asset));
                    }
                    if entries.is_empty() {
                        inner.groups.remove(&group);
                    }
                }
            }
            evicted
        };
        self.evictions.fetch_add(evicted.len() as u64, Ordering::Relaxed);
        for (group, key, asset) in &evicted {
            self.run_unload_hook(group, key, asset);
        }
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        let bytes = inner
            .groups
            .values()
            .flat_map(HashMap::values)
            .filter_map(|entry| entry.asset.size_hint())
            .map(|size| size as u64)
            .sum();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: inner.groups.values().map(HashMap::len).sum(),
            groups: inner.groups.len(),
            evictions: self.evictions.load(Ordering::Relaxed),
            bytes,
        }
    }

    fn run_unload_hook(&self, group: &GroupId, key: &AssetKey, asset: &Asset) {
        let hook = self.unload_hook.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook.on_unload(group, key, asset);
        }
    }
}

impl Default for AssetCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(name: &str) -> GroupId {
        name.into()
    }

    fn key(name: &str) -> AssetKey {
        name.into()
    }

    #[test]
    fn test_get_counts_hits_and_misses() {
        let cache = AssetCache::new();
        cache.put(&group("g"), &key("a"), Asset::new(1u32));

        assert!(cache.get(&group("g"), &key("a")).is_some());
        assert!(cache.get(&group("g"), &key("b")).is_none());
        assert!(cache.get(&group("h"), &key("a")).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn test_groups_are_isolated() {
        let cache = AssetCache::new();
        cache.put(&group("level1"), &key("a"), Asset::new(1u32));
        cache.put(&group("level2"), &key("a"), Asset::new(2u32));

        let one = cache.get(&group("level1"), &key("a")).unwrap();
        let two = cache.get(&group("level2"), &key("a")).unwrap();
        assert_eq!(*one.downcast::<u32>().unwrap(), 1);
        assert_eq!(*two.downcast::<u32>().unwrap(), 2);

        cache.release_group(&group("level1"));
        assert!(cache.get(&group("level1"), &key("a")).is_none());
        assert!(cache.get(&group("level2"), &key("a")).is_some());
    }

    #[test]
    fn test_last_writer_wins_on_duplicate_put() {
        let cache = AssetCache::new();
        cache.put(&group("g"), &key("a"), Asset::new(1u32));
        cache.put(&group("g"), &key("a"), Asset::new(2u32));

        let asset = cache.get(&group("g"), &key("a")).unwrap();
        assert_eq!(*asset.downcast::<u32>().unwrap(), 2);
        assert_eq!(cache.stats().entries, 1);
    }

    #[test]
    fn test_release_asset_removes_single_entry() {
        let cache = AssetCache::new();
        cache.put(&group("g"), &key("a"), Asset::new(1u32));
        cache.put(&group("g"), &key("b"), Asset::new(2u32));

        assert!(cache.release_asset(&group("g"), &key("a")));
        assert!(!cache.release_asset(&group("g"), &key("a")));
        assert!(cache.get(&group("g"), &key("b")).is_some());
    }

    #[test]
    fn test_shared_claim_survives_first_owner_release() {
        let cache = AssetCache::new();
        cache.put(&group("g"), &key("a"), Asset::new(1u32));

        let first = cache.register_owner();
        let second = cache.register_owner();
        assert!(cache.claim(first, &group("g"), &key("a")));
        assert!(cache.claim(second, &group("g"), &key("a")));

        cache.release_owner(first);
        assert!(cache.get(&group("g"), &key("a")).is_some());

        cache.release_owner(second);
        assert!(cache.get(&group("g"), &key("a")).is_none());
    }

    #[test]
    fn test_claim_on_missing_entry_fails() {
        let cache = AssetCache::new();
        let owner = cache.register_owner();
        assert!(!cache.claim(owner, &group("g"), &key("nope")));
    }

    #[test]
    fn test_unclaimed_entries_ignore_owner_release() {
        let cache = AssetCache::new();
        cache.put(&group("g"), &key("a"), Asset::new(1u32));
        let owner = cache.register_owner();
        cache.release_owner(owner);
        assert!(cache.get(&group("g"), &key("a")).is_some());
    }

    #[test]
    fn test_group_release_invalidates_owner_claims() {
        let cache = AssetCache::new();
        cache.put(&group("g"), &key("a"), Asset::new(1u32));
        let owner = cache.register_owner();
        assert!(cache.claim(owner, &group("g"), &key("a")));

        cache.release_group(&group("g"));
        cache.put(&group("g"), &key("a"), Asset::new(2u32));

        // The claim died with the evicted entry, so releasing the owner
        // must not touch the replacement.
        cache.release_owner(owner);
        assert!(cache.get(&group("g"), &key("a")).is_some());
    }

    #[test]
    fn test_asset_release_invalidates_owner_claims() {
        let cache = AssetCache::new();
        cache.put(&group("g"), &key("a"), Asset::new(1u32));
        let owner = cache.register_owner();
        assert!(cache.claim(owner, &group("g"), &key("a")));

        assert!(cache.release_asset(&group("g"), &key("a")));
        cache.put(&group("g"), &key("a"), Asset::new(2u32));

        cache.release_owner(owner);
        assert!(cache.get(&group("g"), &key("a")).is_some());
    }

    #[test]
    fn test_release_all_clears_every_group() {
        let cache = AssetCache::new();
        cache.put(&group("g1"), &key("a"), Asset::new(1u32));
        cache.put(&group("g2"), &key("b"), Asset::new(2u32));
        let owner = cache.register_owner();
        assert!(cache.claim(owner, &group("g1"), &key("a")));

        assert_eq!(cache.release_all(), 2);
        let stats = cache.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.evictions, 2);

        // Claims were cleared with the entries.
        cache.release_owner(owner);
        assert_eq!(cache.stats().evictions, 2);
    }

    #[test]
    fn test_byte_accounting_follows_size_hints() {
        let cache = AssetCache::new();
        cache.put(&group("g1"), &key("a"), Asset::with_size(1u32, 100));
        cache.put(&group("g1"), &key("b"), Asset::with_size(2u32, 50));
        cache.put(&group("g2"), &key("c"), Asset::new(3u32));

        assert_eq!(cache.group_size_bytes(&group("g1")), 150);
        assert_eq!(cache.group_size_bytes(&group("g2")), 0);
        assert_eq!(cache.stats().bytes, 150);

        cache.release_asset(&group("g1"), &key("b"));
        assert_eq!(cache.group_size_bytes(&group("g1")), 100);
    }

    #[test]
    fn test_unload_hook_runs_per_eviction() {
        use std::sync::atomic::AtomicUsize;

        struct Counter(AtomicUsize);
        impl UnloadHook for Counter {
            fn on_unload(&self, _group: &GroupId, _key: &AssetKey, _asset: &Asset) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let cache = AssetCache::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        cache.set_unload_hook(Arc::clone(&counter) as Arc<dyn UnloadHook>);

        cache.put(&group("g"), &key("a"), Asset::new(1u32));
        cache.put(&group("g"), &key("b"), Asset::new(2u32));
        cache.release_group(&group("g"));

        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }
}
