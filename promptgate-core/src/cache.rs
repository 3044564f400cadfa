//! Concurrent semantic cache for remote judgments.
//!
//! A plain concurrent map with reaper-on-read semantics: expiry is checked
//! lazily when an entry is fetched, and capacity eviction is amortized into
//! writers. No background thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::judge::{GuardType, Judgment};

/// Rough fixed per-entry overhead used for the byte estimate.
const ENTRY_OVERHEAD_BYTES: u64 = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_seconds: u64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 3_600,
            max_entries: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    judgment: Judgment,
    created: Instant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub estimated_bytes: u64,
}

/// Fingerprint-keyed judgment cache.
pub struct SemanticCache {
    entries: DashMap<String, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    config: CacheConfig,
}

impl SemanticCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            config,
        }
    }

    /// Case-folded, whitespace-trimmed SHA-256 fingerprint, namespaced by
    /// guard type.
    fn key(input: &str, guard_type: GuardType) -> String {
        let canonical = input.trim().to_lowercase();
        let digest = Sha256::digest(canonical.as_bytes());
        format!("{}:{}", guard_type.as_str(), hex::encode(digest))
    }

    /// Fetch a cached judgment. Expired entries are removed on sight and
    /// reported as misses.
    pub fn try_get(&self, input: &str, guard_type: GuardType) -> Option<Judgment> {
        if !self.config.enabled {
            return None;
        }
        let key = Self::key(input, guard_type);
        let ttl = Duration::from_secs(self.config.ttl_seconds);

        if let Some(entry) = self.entries.get(&key) {
            if entry.created.elapsed() <= ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                let mut judgment = entry.judgment.clone();
                judgment.from_cache = true;
                return Some(judgment);
            }
            drop(entry);
            self.entries.remove(&key);
            debug!(key = %key, "cache entry expired");
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a judgment. No-op when caching is disabled. When the entry
    /// count has reached capacity, the oldest 10% by creation time are
    /// evicted first.
    pub fn set(&self, input: &str, guard_type: GuardType, judgment: Judgment) {
        if !self.config.enabled {
            return;
        }
        if self.entries.len() >= self.config.max_entries {
            self.evict_oldest();
        }
        self.entries.insert(
            Self::key(input, guard_type),
            CacheEntry {
                judgment,
                created: Instant::now(),
            },
        );
    }

    fn evict_oldest(&self) {
        let mut by_age: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().created))
            .collect();
        by_age.sort_by_key(|(_, created)| *created);

        let evict_count = (by_age.len() / 10).max(1);
        for (key, _) in by_age.into_iter().take(evict_count) {
            self.entries.remove(&key);
        }
        debug!(evicted = evict_count, "cache capacity eviction");
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let estimated_bytes: u64 = self
            .entries
            .iter()
            .map(|e| ENTRY_OVERHEAD_BYTES + e.value().judgment.reasoning.len() as u64)
            .sum();

        CacheStats {
            entries: self.entries.len(),
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            estimated_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::Severity;

    fn judgment(reasoning: &str) -> Judgment {
        Judgment {
            passed: true,
            score: 0.1,
            severity: Severity::None,
            reasoning: reasoning.to_string(),
            categories: Vec::new(),
            latency_ms: 5,
            model: "test".to_string(),
            from_cache: false,
        }
    }

    fn cache_with(ttl_seconds: u64, max_entries: usize) -> SemanticCache {
        SemanticCache::new(CacheConfig {
            enabled: true,
            ttl_seconds,
            max_entries,
        })
    }

    #[test]
    fn get_after_set_returns_value_marked_cached() {
        let cache = cache_with(60, 100);
        cache.set("Hello", GuardType::Input, judgment("ok"));
        let hit = cache.try_get("Hello", GuardType::Input).unwrap();
        assert!(hit.from_cache);
        assert_eq!(hit.reasoning, "ok");
    }

    #[test]
    fn keys_are_case_folded_and_trimmed() {
        let cache = cache_with(60, 100);
        cache.set("  HELLO world  ", GuardType::Input, judgment("ok"));
        assert!(cache.try_get("hello world", GuardType::Input).is_some());
    }

    #[test]
    fn guard_types_are_namespaced() {
        let cache = cache_with(60, 100);
        cache.set("text", GuardType::Input, judgment("in"));
        assert!(cache.try_get("text", GuardType::Output).is_none());
    }

    #[test]
    fn expired_entries_are_reaped_on_read() {
        let cache = cache_with(0, 100);
        cache.set("key", GuardType::Input, judgment("ok"));
        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.try_get("key", GuardType::Input).is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn disabled_cache_is_a_noop() {
        let cache = SemanticCache::new(CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        cache.set("key", GuardType::Input, judgment("ok"));
        assert!(cache.try_get("key", GuardType::Input).is_none());
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn capacity_evicts_oldest_tenth() {
        let cache = cache_with(60, 10);
        for i in 0..10 {
            cache.set(&format!("key-{i}"), GuardType::Input, judgment("ok"));
            // Distinct creation times so "oldest" is well-defined.
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(cache.stats().entries, 10);

        cache.set("key-10", GuardType::Input, judgment("ok"));
        assert_eq!(cache.stats().entries, 10);
        // The oldest entry went away; the newest stayed.
        assert!(cache.try_get("key-0", GuardType::Input).is_none());
        assert!(cache.try_get("key-10", GuardType::Input).is_some());
    }

    #[test]
    fn hit_rate_is_exact() {
        let cache = cache_with(60, 100);
        cache.set("a", GuardType::Input, judgment("ok"));
        cache.try_get("a", GuardType::Input); // hit
        cache.try_get("b", GuardType::Input); // miss
        cache.try_get("a", GuardType::Input); // hit

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn clear_empties_entries() {
        let cache = cache_with(60, 100);
        cache.set("a", GuardType::Input, judgment("ok"));
        cache.clear();
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn estimated_bytes_scale_with_reasoning() {
        let cache = cache_with(60, 100);
        cache.set("a", GuardType::Input, judgment("x"));
        let small = cache.stats().estimated_bytes;
        cache.set("b", GuardType::Input, judgment(&"y".repeat(500)));
        let large = cache.stats().estimated_bytes;
        assert!(large > small + 400);
    }

    #[test]
    fn concurrent_reads_and_writes() {
        let cache = std::sync::Arc::new(cache_with(60, 1_000));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let key = format!("t{t}-k{i}");
                        cache.set(&key, GuardType::Input, judgment("ok"));
                        assert!(cache.try_get(&key, GuardType::Input).is_some());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.stats().entries, 400);
    }
}
