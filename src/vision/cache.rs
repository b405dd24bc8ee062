//! Bounded cache for direct image questions

use crate::utils::sha256_hex;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// `(question, sha256 of the image bytes)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    question: String,
    image_digest: String,
}

impl CacheKey {
    pub fn new(question: &str, image_bytes: &[u8]) -> Self {
        Self {
            question: question.to_string(),
            image_digest: sha256_hex(image_bytes),
        }
    }
}

/// LRU map from `(question, image)` to the model's answer.
///
/// Keys hash the image instead of storing it, so a full cache holds at most
/// `capacity` answers regardless of image size. Capacity 0 disables caching.
pub struct AnswerCache {
    entries: Option<Mutex<LruCache<CacheKey, String>>>,
}

impl AnswerCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|capacity| Mutex::new(LruCache::new(capacity))),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    pub fn get(&self, key: &CacheKey) -> Option<String> {
        let entries = self.entries.as_ref()?;
        let mut guard = entries.lock().ok()?;
        guard.get(key).cloned()
    }

    pub fn put(&self, key: CacheKey, answer: String) {
        if let Some(entries) = &self.entries {
            if let Ok(mut guard) = entries.lock() {
                guard.put(key, answer);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .as_ref()
            .and_then(|entries| entries.lock().ok().map(|guard| guard.len()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_after_put() {
        let cache = AnswerCache::new(2);
        let key = CacheKey::new("what is this?", b"image-bytes");
        assert!(cache.get(&key).is_none());

        cache.put(key.clone(), "a red circle".to_string());
        assert_eq!(cache.get(&key).as_deref(), Some("a red circle"));
    }

    #[test]
    fn test_key_depends_on_question_and_image() {
        let cache = AnswerCache::new(4);
        cache.put(CacheKey::new("q", b"one"), "first".to_string());

        assert!(cache.get(&CacheKey::new("q", b"two")).is_none());
        assert!(cache.get(&CacheKey::new("other", b"one")).is_none());
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let cache = AnswerCache::new(2);
        let a = CacheKey::new("a", b"x");
        let b = CacheKey::new("b", b"x");
        let c = CacheKey::new("c", b"x");

        cache.put(a.clone(), "A".to_string());
        cache.put(b.clone(), "B".to_string());
        // Touch `a` so `b` becomes the eviction candidate
        assert!(cache.get(&a).is_some());
        cache.put(c.clone(), "C".to_string());

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&a).is_some());
        assert!(cache.get(&c).is_some());
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let cache = AnswerCache::new(0);
        let key = CacheKey::new("q", b"img");
        cache.put(key.clone(), "answer".to_string());

        assert!(!cache.is_enabled());
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }
}
