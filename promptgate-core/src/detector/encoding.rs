//! L1 encoding-bypass detector.
//!
//! Runs after the normalizer and reads its transformation counts: a raw
//! input carrying enough invisible characters or homoglyphs is an
//! obfuscation attempt regardless of what the decoded text says. Encoded
//! payload patterns (base64 runs, hex runs, escapes) are softer signals and
//! escalate rather than block.

use std::time::Instant;

use async_trait::async_trait;

use super::{best_match, DetectorError, DetectorInfo, InputDetector, ORDER_ENCODING};
use crate::context::CheckContext;
use crate::pattern::{banks::CAT_ENCODING, PatternEngine};
use crate::verdict::{DetectorLayer, DetectorVerdict, Severity};

pub const DEFAULT_INVISIBLE_LIMIT: usize = 5;
pub const DEFAULT_HOMOGLYPH_LIMIT: usize = 10;

pub struct EncodingBypassDetector {
    engine: PatternEngine,
    escalation_threshold: f64,
    /// Invisible-character count at which the input is blocked outright.
    invisible_limit: usize,
    /// Homoglyph count at which the input is blocked outright.
    homoglyph_limit: usize,
    enabled: bool,
}

impl EncodingBypassDetector {
    pub fn new(engine: PatternEngine, escalation_threshold: f64) -> Self {
        Self {
            engine,
            escalation_threshold,
            invisible_limit: DEFAULT_INVISIBLE_LIMIT,
            homoglyph_limit: DEFAULT_HOMOGLYPH_LIMIT,
            enabled: true,
        }
    }

    pub fn with_limits(mut self, invisible_limit: usize, homoglyph_limit: usize) -> Self {
        self.invisible_limit = invisible_limit.max(1);
        self.homoglyph_limit = homoglyph_limit.max(1);
        self
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn count_verdict(&self, pattern: &str, count: usize, limit: usize, latency_ms: u64) -> DetectorVerdict {
        // Score proportional to how far past the limit the count is.
        let score = (count as f64 / (limit as f64 * 2.0)).min(1.0);
        DetectorVerdict {
            detector: self.name().to_string(),
            layer: self.layer(),
            passed: false,
            score,
            severity: Severity::High,
            pattern: Some(pattern.to_string()),
            matched_text: None,
            details: Some(format!("{count} occurrences (limit {limit})")),
            needs_escalation: false,
            latency_ms,
        }
    }
}

impl DetectorInfo for EncodingBypassDetector {
    fn name(&self) -> &str {
        "L1EncodingBypass"
    }

    fn layer(&self) -> DetectorLayer {
        DetectorLayer::L1
    }

    fn order(&self) -> u32 {
        ORDER_ENCODING
    }

    fn enabled(&self) -> bool {
        self.enabled
    }
}

#[async_trait]
impl InputDetector for EncodingBypassDetector {
    async fn check(&self, ctx: &CheckContext) -> Result<DetectorVerdict, DetectorError> {
        let started = Instant::now();

        if let Some(report) = ctx.normalization() {
            if report.invisible_dropped >= self.invisible_limit {
                return Ok(self.count_verdict(
                    "InvisibleCharacters",
                    report.invisible_dropped,
                    self.invisible_limit,
                    started.elapsed().as_millis() as u64,
                ));
            }
            if report.homoglyphs_folded >= self.homoglyph_limit {
                return Ok(self.count_verdict(
                    "HomoglyphFlood",
                    report.homoglyphs_folded,
                    self.homoglyph_limit,
                    started.elapsed().as_millis() as u64,
                ));
            }
        }

        // Encoded payload patterns never block on their own; a confident
        // match hands the call to the judge instead.
        let matches = self.engine.match_all(ctx.effective_input(), CAT_ENCODING);
        let latency_ms = started.elapsed().as_millis() as u64;
        let Some(best) = best_match(&matches) else {
            let mut v = DetectorVerdict::pass(self.name(), self.layer());
            v.latency_ms = latency_ms;
            return Ok(v);
        };

        Ok(DetectorVerdict {
            detector: self.name().to_string(),
            layer: self.layer(),
            passed: true,
            score: best.confidence,
            severity: best.severity,
            pattern: Some(best.pattern_name.clone()),
            matched_text: Some(crate::verdict::truncate_match(&best.matched_text, 60)),
            details: Some(format!("pattern {} matched", best.pattern_name)),
            needs_escalation: best.confidence >= self.escalation_threshold,
            latency_ms,
        })
    }
}
