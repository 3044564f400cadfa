//! Detector capability traits and the shared L1 decision policy.
//!
//! Detectors come in three small capability sets: input, output, and
//! streaming. There is no deeper hierarchy; the pipeline works against these
//! traits and nothing else.

pub mod encoding;
pub mod groundedness;
pub mod injection_classifier;
pub mod jailbreak;
pub mod llm_judge;
pub mod pii;
pub mod prompt_injection;
pub mod rag;
pub mod refusal;
pub mod toxicity;

use async_trait::async_trait;
use thiserror::Error;

use crate::classifier::ClassifierError;
use crate::context::CheckContext;
use crate::pattern::PatternMatch;
use crate::verdict::{truncate_match, DetectorLayer, DetectorVerdict, Severity};

/// Default detector ordering. Relative order is contractual (encoding before
/// injection before jailbreak before PII); the numbers are not.
pub const ORDER_ENCODING: u32 = 50;
pub const ORDER_PROMPT_INJECTION: u32 = 100;
pub const ORDER_JAILBREAK: u32 = 110;
pub const ORDER_PII: u32 = 200;
pub const ORDER_REFUSAL: u32 = 210;
pub const ORDER_CLASSIFIER: u32 = 300;
pub const ORDER_TOXICITY: u32 = 310;
pub const ORDER_RAG: u32 = 400;
pub const ORDER_GROUNDEDNESS: u32 = 410;
pub const ORDER_JUDGE: u32 = 500;

/// Error surfaced by a detector. The orchestrator routes these through the
/// `on_guard_error` hook and the fail-mode policy; they never reach the
/// caller directly.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error("detector failed: {0}")]
    Failed(String),
}

/// Identification shared by every detector capability.
pub trait DetectorInfo {
    fn name(&self) -> &str;
    fn layer(&self) -> DetectorLayer;
    /// Lower runs first; ties broken by name.
    fn order(&self) -> u32;
    fn enabled(&self) -> bool {
        true
    }
}

/// Detector that inspects user input before it reaches the model.
#[async_trait]
pub trait InputDetector: DetectorInfo + Send + Sync {
    async fn check(&self, ctx: &CheckContext) -> Result<DetectorVerdict, DetectorError>;
}

/// Detector that inspects model output before it reaches the user.
#[async_trait]
pub trait OutputDetector: DetectorInfo + Send + Sync {
    async fn check(&self, ctx: &CheckContext, output: &str)
        -> Result<DetectorVerdict, DetectorError>;
}

/// Verdict on a single streaming chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamVerdict {
    Pass,
    /// Replace the chunk with the given text (or drop it when `None`).
    Suppress(Option<String>),
    /// End the stream immediately.
    Terminate(String),
}

/// Detector that validates output token-chunk by token-chunk.
#[async_trait]
pub trait StreamingDetector: Send + Sync {
    fn name(&self) -> &str;
    fn enabled(&self) -> bool {
        true
    }
    /// Validate an incoming chunk. `accumulated` is the full output so far,
    /// including this chunk.
    async fn validate_chunk(
        &self,
        ctx: &CheckContext,
        chunk: &str,
        accumulated: &str,
    ) -> Result<StreamVerdict, DetectorError>;

    /// Validate a complete sentence or the full accumulated output.
    async fn validate_final(
        &self,
        ctx: &CheckContext,
        text: &str,
    ) -> Result<DetectorVerdict, DetectorError>;
}

/// Standard L1 policy: Critical severity blocks; High severity blocks at
/// confidence >= 0.9; anything at or above the escalation threshold is
/// marked for L3 escalation; the rest passes.
pub(crate) fn l1_policy_verdict(
    name: &str,
    layer: DetectorLayer,
    matches: &[PatternMatch],
    escalation_threshold: f64,
    latency_ms: u64,
) -> DetectorVerdict {
    let Some(best) = best_match(matches) else {
        let mut v = DetectorVerdict::pass(name, layer);
        v.latency_ms = latency_ms;
        return v;
    };

    let blocks = best.severity == Severity::Critical
        || (best.severity == Severity::High && best.confidence >= 0.9);

    DetectorVerdict {
        detector: name.to_string(),
        layer,
        passed: !blocks,
        score: best.confidence,
        severity: best.severity,
        pattern: Some(best.pattern_name.clone()),
        matched_text: match_preview(best),
        details: Some(match_details(best, matches.len())),
        needs_escalation: !blocks && best.confidence >= escalation_threshold,
        latency_ms,
    }
}

/// Strongest match by (severity, confidence).
pub(crate) fn best_match(matches: &[PatternMatch]) -> Option<&PatternMatch> {
    matches.iter().max_by(|a, b| {
        (a.severity, a.confidence)
            .partial_cmp(&(b.severity, b.confidence))
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}

fn match_preview(m: &PatternMatch) -> Option<String> {
    if m.timed_out || m.matched_text.is_empty() {
        None
    } else {
        Some(truncate_match(&m.matched_text, 80))
    }
}

fn match_details(best: &PatternMatch, total: usize) -> String {
    if best.timed_out {
        format!("pattern {} exceeded its match budget", best.pattern_name)
    } else if total > 1 {
        format!("{} patterns matched, strongest {}", total, best.pattern_name)
    } else {
        format!("pattern {} matched", best.pattern_name)
    }
}
