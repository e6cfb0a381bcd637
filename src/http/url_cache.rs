//! Bounded memo of composed destination URLs.
//!
//! Keyed by `origin + source`. Values are deterministic given the key, so concurrent
//! writers racing on one key are harmless (last write wins).

use dashmap::DashMap;
use url::Url;

#[derive(Debug)]
pub struct UrlCache {
    entries: DashMap<String, Url>,
    capacity: usize,
}

impl UrlCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn key(origin: Option<&str>, source: &str) -> String {
        format!("{}{}", origin.unwrap_or(""), source)
    }

    pub fn get(&self, key: &str) -> Option<Url> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Insert, evicting an arbitrary entry when full.
    pub fn insert(&self, key: String, url: Url) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            let victim = self.entries.iter().next().map(|entry| entry.key().clone());
            if let Some(victim) = victim {
                self.entries.remove(&victim);
            }
        }
        self.entries.insert(key, url);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
