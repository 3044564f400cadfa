//! L3 LLM-judge detector.
//!
//! Wraps the remote judge as an always-on detector for configurations that
//! want every request judged (Strict preset). In the Standard preset the
//! judge is instead invoked by the orchestrator on escalation.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use super::{DetectorError, DetectorInfo, InputDetector, OutputDetector, ORDER_JUDGE};
use crate::context::CheckContext;
use crate::judge::{Judgment, RemoteJudge};
use crate::verdict::{DetectorLayer, DetectorVerdict};

pub struct LlmJudgeDetector {
    judge: Arc<RemoteJudge>,
    enabled: bool,
}

impl LlmJudgeDetector {
    pub fn new(judge: Arc<RemoteJudge>) -> Self {
        Self {
            judge,
            enabled: true,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn verdict_from(&self, judgment: Judgment, latency_ms: u64) -> DetectorVerdict {
        let block_threshold = self.judge.config().block_threshold;
        let passed = judgment.passed && judgment.score < block_threshold;
        DetectorVerdict {
            detector: self.name().to_string(),
            layer: self.layer(),
            passed,
            score: judgment.score,
            severity: judgment.severity,
            pattern: judgment.categories.first().cloned(),
            matched_text: None,
            details: Some(if judgment.from_cache {
                format!("{} (cached)", judgment.reasoning)
            } else {
                judgment.reasoning
            }),
            needs_escalation: false,
            latency_ms,
        }
    }
}

impl DetectorInfo for LlmJudgeDetector {
    fn name(&self) -> &str {
        "L3LLMJudge"
    }

    fn layer(&self) -> DetectorLayer {
        DetectorLayer::L3
    }

    fn order(&self) -> u32 {
        ORDER_JUDGE
    }

    fn enabled(&self) -> bool {
        self.enabled
    }
}

#[async_trait]
impl InputDetector for LlmJudgeDetector {
    async fn check(&self, ctx: &CheckContext) -> Result<DetectorVerdict, DetectorError> {
        let started = Instant::now();
        let judgment = self.judge.check_input(ctx, None).await;
        Ok(self.verdict_from(judgment, started.elapsed().as_millis() as u64))
    }
}

#[async_trait]
impl OutputDetector for LlmJudgeDetector {
    async fn check(
        &self,
        ctx: &CheckContext,
        output: &str,
    ) -> Result<DetectorVerdict, DetectorError> {
        let started = Instant::now();
        let judgment = self.judge.check_output(ctx, output, None).await;
        Ok(self.verdict_from(judgment, started.elapsed().as_millis() as u64))
    }
}
