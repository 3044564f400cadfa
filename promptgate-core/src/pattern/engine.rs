//! Pattern evaluation with a per-pattern match budget.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use super::{PatternMatch, PatternRegistry};
use crate::verdict::Severity;

pub const DEFAULT_MATCH_BUDGET: Duration = Duration::from_millis(100);

/// Evaluates registry categories against text.
///
/// The `regex` crate guarantees linear-time matching and cannot be
/// pre-empted mid-evaluation, so the budget is enforced by measurement:
/// a pattern whose evaluation exceeds the budget contributes one synthetic
/// timed-out match (severity Medium, confidence 0.5) instead of its
/// concrete matches.
#[derive(Debug, Clone)]
pub struct PatternEngine {
    registry: Arc<PatternRegistry>,
    match_budget: Duration,
}

impl PatternEngine {
    pub fn new(registry: Arc<PatternRegistry>) -> Self {
        Self {
            registry,
            match_budget: DEFAULT_MATCH_BUDGET,
        }
    }

    pub fn with_match_budget(mut self, budget: Duration) -> Self {
        self.match_budget = budget;
        self
    }

    pub fn registry(&self) -> &Arc<PatternRegistry> {
        &self.registry
    }

    /// All matches for the category, deduplicated per pattern by matched
    /// text, in pattern registration order.
    pub fn match_all(&self, text: &str, category: &str) -> Vec<PatternMatch> {
        let mut out = Vec::new();
        for pattern in self.registry.enabled_patterns(category) {
            let started = Instant::now();
            let mut seen: Vec<&str> = Vec::new();
            let mut matches = Vec::new();

            for m in pattern.regex.find_iter(text) {
                if seen.contains(&m.as_str()) {
                    continue;
                }
                seen.push(m.as_str());
                matches.push(PatternMatch {
                    pattern_id: pattern.id.clone(),
                    pattern_name: pattern.name.clone(),
                    matched_text: m.as_str().to_string(),
                    byte_offset: m.start(),
                    char_offset: text[..m.start()].chars().count(),
                    length: m.end() - m.start(),
                    severity: pattern.severity,
                    confidence: pattern.confidence,
                    timed_out: false,
                });
            }

            let elapsed = started.elapsed();
            if elapsed > self.match_budget {
                warn!(
                    pattern_id = %pattern.id,
                    category,
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = self.match_budget.as_millis() as u64,
                    "pattern evaluation exceeded match budget"
                );
                out.push(synthetic_timeout_match(&pattern.id, &pattern.name));
            } else {
                out.append(&mut matches);
            }
        }
        out
    }

    /// First match in the category, or `None`.
    pub fn first_match(&self, text: &str, category: &str) -> Option<PatternMatch> {
        for pattern in self.registry.enabled_patterns(category) {
            let started = Instant::now();
            let found = pattern.regex.find(text);
            if started.elapsed() > self.match_budget {
                return Some(synthetic_timeout_match(&pattern.id, &pattern.name));
            }
            if let Some(m) = found {
                return Some(PatternMatch {
                    pattern_id: pattern.id.clone(),
                    pattern_name: pattern.name.clone(),
                    matched_text: m.as_str().to_string(),
                    byte_offset: m.start(),
                    char_offset: text[..m.start()].chars().count(),
                    length: m.end() - m.start(),
                    severity: pattern.severity,
                    confidence: pattern.confidence,
                    timed_out: false,
                });
            }
        }
        None
    }

    pub fn is_match(&self, text: &str, category: &str) -> bool {
        self.first_match(text, category).is_some()
    }
}

fn synthetic_timeout_match(pattern_id: &str, pattern_name: &str) -> PatternMatch {
    PatternMatch {
        pattern_id: pattern_id.to_string(),
        pattern_name: pattern_name.to_string(),
        matched_text: String::new(),
        byte_offset: 0,
        char_offset: 0,
        length: 0,
        severity: Severity::Medium,
        confidence: 0.5,
        timed_out: true,
    }
}
