//! Hallucination / groundedness detector (L2+L3, output side).
//!
//! Requires a grounding context in the check metadata; without one there is
//! nothing to verify and the detector passes. The actual comparison is
//! delegated to the remote judge's groundedness template.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use super::{DetectorError, DetectorInfo, OutputDetector, ORDER_GROUNDEDNESS};
use crate::context::CheckContext;
use crate::judge::{severity_from_score, RemoteJudge};
use crate::verdict::{truncate_match, DetectorLayer, DetectorVerdict};

/// Hallucination score at or above which the output fails the check.
const FAIL_THRESHOLD: f64 = 0.7;

pub struct GroundednessDetector {
    judge: Arc<RemoteJudge>,
    enabled: bool,
}

impl GroundednessDetector {
    pub fn new(judge: Arc<RemoteJudge>) -> Self {
        Self {
            judge,
            enabled: true,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

impl DetectorInfo for GroundednessDetector {
    fn name(&self) -> &str {
        "Groundedness"
    }

    fn layer(&self) -> DetectorLayer {
        DetectorLayer::L3
    }

    fn order(&self) -> u32 {
        ORDER_GROUNDEDNESS
    }

    fn enabled(&self) -> bool {
        self.enabled
    }
}

#[async_trait]
impl OutputDetector for GroundednessDetector {
    async fn check(
        &self,
        ctx: &CheckContext,
        output: &str,
    ) -> Result<DetectorVerdict, DetectorError> {
        let started = Instant::now();
        let Some(grounding) = ctx.grounding_context() else {
            let mut v = DetectorVerdict::pass(self.name(), self.layer());
            v.latency_ms = started.elapsed().as_millis() as u64;
            return Ok(v);
        };

        let grounded = self.judge.check_groundedness(ctx, grounding, output).await;
        let score = grounded.judgment.score;
        let latency_ms = started.elapsed().as_millis() as u64;

        let details = if grounded.hallucinated_claims.is_empty() {
            grounded.judgment.reasoning.clone()
        } else {
            format!(
                "unsupported claims: {}",
                truncate_match(&grounded.hallucinated_claims.join("; "), 160)
            )
        };

        Ok(DetectorVerdict {
            detector: self.name().to_string(),
            layer: self.layer(),
            passed: score < FAIL_THRESHOLD,
            score,
            severity: severity_from_score(score),
            pattern: grounded.hallucination_type,
            matched_text: None,
            details: Some(details),
            needs_escalation: false,
            latency_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, SemanticCache};
    use crate::context::META_GROUNDING_CONTEXT;
    use crate::judge::{CompletionRequest, CompletionResponse, CompletionService, JudgeConfig};
    use crate::verdict::Severity;

    struct ScriptedJudgeBackend(String);

    #[async_trait]
    impl CompletionService for ScriptedJudgeBackend {
        async fn complete(&self, request: CompletionRequest) -> CompletionResponse {
            CompletionResponse {
                success: true,
                content: self.0.clone(),
                error: None,
                model: request.model,
                prompt_tokens: 1,
                completion_tokens: 1,
                latency_ms: 1,
            }
        }
    }

    fn detector(judge_response: &str) -> GroundednessDetector {
        let judge = RemoteJudge::new(
            Arc::new(ScriptedJudgeBackend(judge_response.to_string())),
            Arc::new(SemanticCache::new(CacheConfig::default())),
            JudgeConfig::default(),
        );
        GroundednessDetector::new(Arc::new(judge))
    }

    fn grounded_ctx() -> CheckContext {
        CheckContext::new("what color is the sky?").with_metadata(
            META_GROUNDING_CONTEXT,
            serde_json::json!("The sky is blue during the day."),
        )
    }

    #[tokio::test]
    async fn missing_grounding_context_passes() {
        let ctx = CheckContext::new("q");
        let v = detector("{}").check(&ctx, "any output").await.unwrap();
        assert!(v.passed);
        assert_eq!(v.score, 0.0);
    }

    #[tokio::test]
    async fn fabricated_output_fails_with_band_severity() {
        let v = detector(
            r#"{"is_grounded": false, "hallucination_score": 0.92, "type": "extrinsic",
                "hallucinated_claims": ["the sky is green"], "reasoning": "contradicts context"}"#,
        )
        .check(&grounded_ctx(), "The sky is green.")
        .await
        .unwrap();
        assert!(!v.passed);
        assert_eq!(v.severity, Severity::Critical);
        assert_eq!(v.pattern.as_deref(), Some("extrinsic"));
        assert!(v.details.unwrap().contains("the sky is green"));
    }

    #[tokio::test]
    async fn mildly_ungrounded_output_passes_with_signal() {
        let v = detector(
            r#"{"is_grounded": true, "hallucination_score": 0.55,
                "hallucinated_claims": [], "reasoning": "mostly supported"}"#,
        )
        .check(&grounded_ctx(), "The sky is blue, usually.")
        .await
        .unwrap();
        assert!(v.passed);
        assert_eq!(v.severity, Severity::Medium);
        assert!(v.score > 0.0);
    }

    #[tokio::test]
    async fn judge_outage_is_fail_open() {
        struct FailingBackend;

        #[async_trait]
        impl CompletionService for FailingBackend {
            async fn complete(&self, request: CompletionRequest) -> CompletionResponse {
                CompletionResponse::failure("down", &request.model, 1)
            }
        }

        let judge = RemoteJudge::new(
            Arc::new(FailingBackend),
            Arc::new(SemanticCache::new(CacheConfig::default())),
            JudgeConfig::default(),
        );
        let detector = GroundednessDetector::new(Arc::new(judge));
        let v = detector
            .check(&grounded_ctx(), "anything")
            .await
            .unwrap();
        assert!(v.passed);
    }
}
