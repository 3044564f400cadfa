//! L1 prompt-injection detector: instruction override, role switching,
//! system-prompt-leak requests, developer-mode triggers, delimiter smuggling.

use std::time::Instant;

use async_trait::async_trait;

use super::{
    l1_policy_verdict, DetectorError, DetectorInfo, InputDetector, ORDER_PROMPT_INJECTION,
};
use crate::context::CheckContext;
use crate::pattern::{banks::CAT_PROMPT_INJECTION, PatternEngine};
use crate::verdict::{DetectorLayer, DetectorVerdict};

pub struct PromptInjectionDetector {
    engine: PatternEngine,
    escalation_threshold: f64,
    enabled: bool,
}

impl PromptInjectionDetector {
    pub fn new(engine: PatternEngine, escalation_threshold: f64) -> Self {
        Self {
            engine,
            escalation_threshold,
            enabled: true,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

impl DetectorInfo for PromptInjectionDetector {
    fn name(&self) -> &str {
        "L1PromptInjection"
    }

    fn layer(&self) -> DetectorLayer {
        DetectorLayer::L1
    }

    fn order(&self) -> u32 {
        ORDER_PROMPT_INJECTION
    }

    fn enabled(&self) -> bool {
        self.enabled
    }
}

#[async_trait]
impl InputDetector for PromptInjectionDetector {
    async fn check(&self, ctx: &CheckContext) -> Result<DetectorVerdict, DetectorError> {
        let started = Instant::now();
        let matches = self
            .engine
            .match_all(ctx.effective_input(), CAT_PROMPT_INJECTION);
        Ok(l1_policy_verdict(
            self.name(),
            self.layer(),
            &matches,
            self.escalation_threshold,
            started.elapsed().as_millis() as u64,
        ))
    }
}
