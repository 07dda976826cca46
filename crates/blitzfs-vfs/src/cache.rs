//! Per-mount response cache.
//!
//! Entries are written once per path and kept for the lifetime of the mount.
//! Nothing is ever refreshed: changes on the server are invisible until the
//! filesystem is remounted.

use blitzfs_client::StatResult;
use dashmap::DashMap;
use serde::Deserialize;

/// How long protocol results may be reused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    /// Every call goes to the server.
    #[default]
    Disabled,
    /// First result per path is served forever.
    StaleForever,
}

impl CachePolicy {
    pub fn from_flag(enabled: bool) -> Self {
        if enabled {
            CachePolicy::StaleForever
        } else {
            CachePolicy::Disabled
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, CachePolicy::Disabled)
    }
}

/// Listing, stat and open-handle memo keyed by remote path.
#[derive(Debug, Default)]
pub struct MountCache {
    listings: DashMap<String, Vec<String>>,
    stats: DashMap<String, StatResult>,
    handles: DashMap<String, u64>,
}

impl MountCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listing(&self, path: &str) -> Option<Vec<String>> {
        self.listings.get(path).map(|entry| entry.value().clone())
    }

    pub fn put_listing(&self, path: &str, listing: Vec<String>) {
        self.listings.entry(path.to_string()).or_insert(listing);
    }

    pub fn stat(&self, path: &str) -> Option<StatResult> {
        self.stats.get(path).map(|entry| entry.value().clone())
    }

    pub fn put_stat(&self, path: &str, stat: StatResult) {
        self.stats.entry(path.to_string()).or_insert(stat);
    }

    pub fn handle(&self, path: &str) -> Option<u64> {
        self.handles.get(path).map(|entry| *entry.value())
    }

    pub fn put_handle(&self, path: &str, handle: u64) {
        self.handles.entry(path.to_string()).or_insert(handle);
    }

    /// Entry counts as (listings, stats, handles).
    pub fn len(&self) -> (usize, usize, usize) {
        (self.listings.len(), self.stats.len(), self.handles.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == (0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blitzfs_client::EntryKind;

    #[test]
    fn test_policy() {
        assert_eq!(CachePolicy::default(), CachePolicy::Disabled);
        assert!(CachePolicy::from_flag(true).is_enabled());
        assert!(!CachePolicy::from_flag(false).is_enabled());
    }

    #[test]
    fn test_maps_are_independent() {
        let cache = MountCache::new();
        cache.put_listing("/d", vec!["/d/a".into()]);
        assert_eq!(cache.listing("/d"), Some(vec!["/d/a".to_string()]));
        assert!(cache.stat("/d").is_none());
        assert!(cache.handle("/d").is_none());
        assert_eq!(cache.len(), (1, 0, 0));
    }

    #[test]
    fn test_first_write_wins() {
        let cache = MountCache::new();
        cache.put_handle("/f", 1);
        cache.put_handle("/f", 2);
        assert_eq!(cache.handle("/f"), Some(1));

        let stat = |size| StatResult {
            kind: EntryKind::File,
            size,
            name: "f".into(),
        };
        cache.put_stat("/f", stat(10));
        cache.put_stat("/f", stat(20));
        assert_eq!(cache.stat("/f").unwrap().size, 10);
    }
}
