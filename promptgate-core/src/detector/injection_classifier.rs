//! L2 prompt-injection classifier detector.
//!
//! Delegates to an external sequence classifier over labels
//! {safe, injection}. Fail-open: any inference error or timeout passes the
//! request through with a warning log.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::warn;

use super::{DetectorError, DetectorInfo, InputDetector, ORDER_CLASSIFIER};
use crate::classifier::{SequenceClassifier, Tokenizer};
use crate::context::CheckContext;
use crate::verdict::{DetectorLayer, DetectorVerdict, Severity};

pub const LABEL_INJECTION: &str = "injection";

pub const DEFAULT_BLOCK_THRESHOLD: f64 = 0.85;
pub const DEFAULT_ESCALATION_THRESHOLD: f64 = 0.5;
pub const DEFAULT_INFERENCE_TIMEOUT_MS: u64 = 5_000;

pub struct InjectionClassifierDetector {
    classifier: Arc<dyn SequenceClassifier>,
    tokenizer: Tokenizer,
    block_threshold: f64,
    escalation_threshold: f64,
    inference_timeout: Duration,
    enabled: bool,
}

impl InjectionClassifierDetector {
    pub fn new(classifier: Arc<dyn SequenceClassifier>, tokenizer: Tokenizer) -> Self {
        Self {
            classifier,
            tokenizer,
            block_threshold: DEFAULT_BLOCK_THRESHOLD,
            escalation_threshold: DEFAULT_ESCALATION_THRESHOLD,
            inference_timeout: Duration::from_millis(DEFAULT_INFERENCE_TIMEOUT_MS),
            enabled: true,
        }
    }

    pub fn with_thresholds(mut self, block: f64, escalation: f64) -> Self {
        self.block_threshold = block;
        self.escalation_threshold = escalation;
        self
    }

    pub fn with_inference_timeout(mut self, timeout: Duration) -> Self {
        self.inference_timeout = timeout;
        self
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

impl DetectorInfo for InjectionClassifierDetector {
    fn name(&self) -> &str {
        "L2InjectionClassifier"
    }

    fn layer(&self) -> DetectorLayer {
        DetectorLayer::L2
    }

    fn order(&self) -> u32 {
        ORDER_CLASSIFIER
    }

    fn enabled(&self) -> bool {
        self.enabled
    }
}

#[async_trait]
impl InputDetector for InjectionClassifierDetector {
    async fn check(&self, ctx: &CheckContext) -> Result<DetectorVerdict, DetectorError> {
        let started = Instant::now();
        let encoded = self.tokenizer.encode(ctx.effective_input());

        let scores = match tokio::time::timeout(
            self.inference_timeout,
            self.classifier.classify(&encoded),
        )
        .await
        {
            Ok(Ok(scores)) => scores,
            Ok(Err(e)) => {
                warn!(request_id = %ctx.request_id, error = %e, "injection classifier failed, passing");
                let mut v = DetectorVerdict::pass(self.name(), self.layer());
                v.latency_ms = started.elapsed().as_millis() as u64;
                v.details = Some("classifier unavailable".to_string());
                return Ok(v);
            }
            Err(_) => {
                warn!(
                    request_id = %ctx.request_id,
                    timeout_ms = self.inference_timeout.as_millis() as u64,
                    "injection classifier timed out, passing"
                );
                let mut v = DetectorVerdict::pass(self.name(), self.layer());
                v.latency_ms = started.elapsed().as_millis() as u64;
                v.details = Some("classifier timeout".to_string());
                return Ok(v);
            }
        };

        let p_injection = scores
            .get(LABEL_INJECTION)
            .copied()
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        let latency_ms = started.elapsed().as_millis() as u64;

        let verdict = if p_injection >= self.block_threshold {
            DetectorVerdict {
                detector: self.name().to_string(),
                layer: self.layer(),
                passed: false,
                score: p_injection,
                severity: Severity::Critical,
                pattern: None,
                matched_text: None,
                details: Some(format!("P(injection) = {p_injection:.3}")),
                needs_escalation: false,
                latency_ms,
            }
        } else if p_injection >= self.escalation_threshold {
            DetectorVerdict {
                detector: self.name().to_string(),
                layer: self.layer(),
                passed: true,
                score: p_injection,
                severity: Severity::Medium,
                pattern: None,
                matched_text: None,
                details: Some(format!("P(injection) = {p_injection:.3}")),
                needs_escalation: true,
                latency_ms,
            }
        } else {
            let mut v = DetectorVerdict::pass(self.name(), self.layer());
            v.score = p_injection;
            v.latency_ms = latency_ms;
            v
        };
        Ok(verdict)
    }
}
