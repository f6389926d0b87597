//! In-process cache for serialized map responses. Hits replay the stored
//! bytes verbatim, so identical queries over an unchanged snapshot return
//! byte-identical output. Swept daily by the retention scheduler.

use dashmap::DashMap;
use tracing::info;

#[derive(Default)]
pub struct ResponseCache {
    entries: DashMap<String, String>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn put(&self, key: String, value: String) {
        self.entries.insert(key, value);
    }

    pub fn purge(&self) {
        let count = self.entries.len();
        self.entries.clear();
        info!("purged {count} cached responses");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_purges() {
        let cache = ResponseCache::new();
        assert!(cache.get("k").is_none());
        cache.put("k".into(), "v".into());
        assert_eq!(cache.get("k").as_deref(), Some("v"));
        assert_eq!(cache.len(), 1);
        cache.purge();
        assert!(cache.is_empty());
        assert!(cache.get("k").is_none());
    }
}
