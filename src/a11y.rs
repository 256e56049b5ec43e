//! 4.J A11y result cache: a small LRU keyed by a canonicalized
//! `(scope, sorted(tags))` tuple, invalidated wholesale on navigation.
//! Hand-rolled rather than pulling in the `lru` crate — ten entries does
//! not warrant the dependency.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

const CAPACITY: usize = 10;

/// Canonicalize `(scope, tags)` into a stable cache key: tags are
/// deduplicated and sorted so argument order never produces a cache miss.
pub fn canonical_key(scope: &str, tags: &[String]) -> String {
    let mut sorted: Vec<&str> = tags.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    format!("{scope}::{}", sorted.join(","))
}

struct Inner {
    entries: HashMap<String, Value>,
    /// Least-recently-used order, front = least recently used.
    order: VecDeque<String>,
    last_known_url: Option<String>,
}

pub struct A11yCache {
    inner: Mutex<Inner>,
}

impl A11yCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                last_known_url: None,
            }),
        }
    }

    /// Cache lookup. Not called when `force_refresh` is requested by the
    /// caller — the lookup is bypassed, not consulted-and-ignored.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock();
        let value = inner.entries.get(key).cloned();
        if value.is_some() {
            inner.order.retain(|k| k != key);
            inner.order.push_back(key.to_string());
        }
        value
    }

    /// Store a successful audit result. Errors and timeouts must never be
    /// passed here.
    pub fn put(&self, key: String, value: Value) {
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(&key) && inner.order.len() >= CAPACITY {
            if let Some(evicted) = inner.order.pop_front() {
                inner.entries.remove(&evicted);
            }
        }
        inner.order.retain(|k| k != &key);
        inner.order.push_back(key.clone());
        inner.entries.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The last URL observed via [`Self::observe_url`], if any.
    pub fn current_url(&self) -> Option<String> {
        self.inner.lock().last_known_url.clone()
    }

    /// Observe the page's current URL; if it differs from the last
    /// observation, every cache entry is invalidated.
    pub fn observe_url(&self, url: &str) {
        let mut inner = self.inner.lock();
        if inner.last_known_url.as_deref() != Some(url) {
            inner.entries.clear();
            inner.order.clear();
            inner.last_known_url = Some(url.to_string());
        }
    }
}

impl Default for A11yCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_key_ignores_tag_order_and_duplicates() {
        let a = canonical_key("page", &["wcag2a".into(), "color".into()]);
        let b = canonical_key("page", &["color".into(), "wcag2a".into(), "color".into()]);
        assert_eq!(a, b);
    }

    #[test]
    fn get_after_put_returns_cached_value() {
        let cache = A11yCache::new();
        cache.put("k1".into(), json!({"violations": []}));
        assert_eq!(cache.get("k1"), Some(json!({"violations": []})));
    }

    #[test]
    fn lru_evicts_least_recently_used_beyond_capacity() {
        let cache = A11yCache::new();
        for i in 0..CAPACITY {
            cache.put(format!("k{i}"), json!(i));
        }
        // touch k0 so it is most-recently-used.
        cache.get("k0");
        cache.put("k_new".into(), json!("new"));
        assert!(cache.get("k0").is_some());
        assert!(cache.get("k1").is_none());
        assert_eq!(cache.len(), CAPACITY);
    }

    #[test]
    fn navigation_invalidates_all_entries() {
        let cache = A11yCache::new();
        cache.observe_url("https://a.example/page1");
        cache.put("k1".into(), json!({}));
        assert_eq!(cache.len(), 1);
        cache.observe_url("https://a.example/page2");
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn same_url_observation_does_not_invalidate() {
        let cache = A11yCache::new();
        cache.observe_url("https://a.example/page1");
        cache.put("k1".into(), json!({}));
        cache.observe_url("https://a.example/page1");
        assert_eq!(cache.len(), 1);
    }
}
