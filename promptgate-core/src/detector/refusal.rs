//! L1 output refusal detector. Informational: a refusal is flagged so the
//! application can count and review it, never blocked.

use std::time::Instant;

use async_trait::async_trait;

use super::{best_match, DetectorError, DetectorInfo, OutputDetector, ORDER_REFUSAL};
use crate::context::CheckContext;
use crate::pattern::{banks::CAT_REFUSAL, PatternEngine};
use crate::verdict::{truncate_match, DetectorLayer, DetectorVerdict};

pub struct RefusalDetector {
    engine: PatternEngine,
    enabled: bool,
}

impl RefusalDetector {
    pub fn new(engine: PatternEngine) -> Self {
        Self {
            engine,
            enabled: true,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

impl DetectorInfo for RefusalDetector {
    fn name(&self) -> &str {
        "L1Refusal"
    }

    fn layer(&self) -> DetectorLayer {
        DetectorLayer::L1
    }

    fn order(&self) -> u32 {
        ORDER_REFUSAL
    }

    fn enabled(&self) -> bool {
        self.enabled
    }
}

#[async_trait]
impl OutputDetector for RefusalDetector {
    async fn check(
        &self,
        _ctx: &CheckContext,
        output: &str,
    ) -> Result<DetectorVerdict, DetectorError> {
        let started = Instant::now();
        let matches = self.engine.match_all(output, CAT_REFUSAL);
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
            matched_text: Some(truncate_match(&best.matched_text, 80)),
            details: Some("model refused the request".to_string()),
            needs_escalation: false,
            latency_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{banks, PatternRegistry};
    use crate::verdict::Severity;
    use std::sync::Arc;

    fn detector() -> RefusalDetector {
        let registry = Arc::new(PatternRegistry::new());
        registry.register_bank(CAT_REFUSAL, banks::refusal_bank());
        RefusalDetector::new(PatternEngine::new(registry))
    }

    #[tokio::test]
    async fn refusal_is_flagged_never_blocked() {
        let ctx = CheckContext::new("q");
        let v = detector()
            .check(&ctx, "I cannot help with that request.")
            .await
            .unwrap();
        assert!(v.passed);
        assert!(v.score > 0.0);
        assert_eq!(v.severity, Severity::Info);
    }

    #[tokio::test]
    async fn normal_answer_passes_clean() {
        let ctx = CheckContext::new("q");
        let v = detector()
            .check(&ctx, "The capital of France is Paris.")
            .await
            .unwrap();
        assert!(v.passed);
        assert_eq!(v.score, 0.0);
    }
}
