//! Thread-safe, category-keyed pattern registry.
//!
//! Append-mostly: banks are registered at startup and the registry is
//! effectively read-only under load. Updates swap whole `Arc`s so readers
//! never observe a half-written pattern.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::PatternDefinition;

#[derive(Debug, Default)]
pub struct PatternRegistry {
    categories: DashMap<String, Vec<Arc<PatternDefinition>>>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a pattern within a category. Registration is
    /// idempotent by pattern id: a re-register replaces the previous
    /// definition in place, preserving bank order.
    pub fn register(&self, category: &str, pattern: PatternDefinition) {
        let pattern = Arc::new(pattern);
        let mut entry = self.categories.entry(category.to_string()).or_default();
        match entry.iter_mut().find(|p| p.id == pattern.id) {
            Some(slot) => *slot = pattern,
            None => entry.push(pattern),
        }
    }

    /// Register a whole bank under one category.
    pub fn register_bank(&self, category: &str, patterns: Vec<PatternDefinition>) {
        let count = patterns.len();
        for pattern in patterns {
            self.register(category, pattern);
        }
        debug!(category, count, "pattern bank registered");
    }

    /// Disable a pattern without removing it. Returns false when the
    /// category or id is unknown.
    pub fn disable(&self, category: &str, id: &str) -> bool {
        let Some(mut entry) = self.categories.get_mut(category) else {
            return false;
        };
        match entry.iter_mut().find(|p| p.id == id) {
            Some(slot) => {
                let mut updated = (**slot).clone_definition();
                updated.enabled = false;
                *slot = Arc::new(updated);
                true
            }
            None => false,
        }
    }

    /// All enabled patterns for a category, in registration order.
    pub fn enabled_patterns(&self, category: &str) -> Vec<Arc<PatternDefinition>> {
        self.categories
            .get(category)
            .map(|entry| entry.iter().filter(|p| p.enabled).cloned().collect())
            .unwrap_or_default()
    }

    pub fn categories(&self) -> Vec<String> {
        self.categories.iter().map(|e| e.key().clone()).collect()
    }

    pub fn pattern_count(&self, category: &str) -> usize {
        self.categories.get(category).map(|e| e.len()).unwrap_or(0)
    }
}

impl PatternDefinition {
    /// Deep copy used when toggling `enabled` behind an `Arc`.
    fn clone_definition(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            regex: self.regex.clone(),
            severity: self.severity,
            confidence: self.confidence,
            description: self.description.clone(),
            enabled: self.enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::Severity;

    fn pattern(id: &str, name: &str, re: &str) -> PatternDefinition {
        PatternDefinition::new(id, name, re, Severity::High, 0.9).unwrap()
    }

    #[test]
    fn register_is_idempotent_by_id() {
        let registry = PatternRegistry::new();
        registry.register("cat", pattern("p1", "First", "first"));
        registry.register("cat", pattern("p1", "Replaced", "second"));

        let patterns = registry.enabled_patterns("cat");
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].name, "Replaced");
    }

    #[test]
    fn disable_hides_pattern_from_lookup() {
        let registry = PatternRegistry::new();
        registry.register("cat", pattern("p1", "One", "one"));
        registry.register("cat", pattern("p2", "Two", "two"));

        assert!(registry.disable("cat", "p1"));
        let enabled = registry.enabled_patterns("cat");
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, "p2");
        assert_eq!(registry.pattern_count("cat"), 2);
    }

    #[test]
    fn disable_unknown_returns_false() {
        let registry = PatternRegistry::new();
        assert!(!registry.disable("nope", "p1"));
        registry.register("cat", pattern("p1", "One", "one"));
        assert!(!registry.disable("cat", "missing"));
    }

    #[test]
    fn categories_enumerates_all() {
        let registry = PatternRegistry::new();
        registry.register("a", pattern("p1", "One", "one"));
        registry.register("b", pattern("p2", "Two", "two"));
        let mut cats = registry.categories();
        cats.sort();
        assert_eq!(cats, vec!["a", "b"]);
    }

    #[test]
    fn concurrent_registration() {
        let registry = std::sync::Arc::new(PatternRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let reg = registry.clone();
                std::thread::spawn(move || {
                    reg.register("shared", pattern(&format!("p{i}"), "P", "x"));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.pattern_count("shared"), 8);
    }
}
