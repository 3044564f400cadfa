//! L2 toxicity classifier detector (output side).
//!
//! Multi-label sigmoid model: each label carries an independent probability.
//! The verdict reports the maximum category; thresholds mirror the injection
//! classifier.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::warn;

use super::{DetectorError, DetectorInfo, OutputDetector, ORDER_TOXICITY};
use crate::classifier::{SequenceClassifier, Tokenizer};
use crate::context::CheckContext;
use crate::verdict::{DetectorLayer, DetectorVerdict, Severity};

/// Labels of the multi-label toxicity head.
pub const TOXICITY_LABELS: [&str; 7] = [
    "toxicity",
    "severe_toxicity",
    "obscene",
    "threat",
    "insult",
    "identity_attack",
    "sexual_explicit",
];

pub struct ToxicityDetector {
    classifier: Arc<dyn SequenceClassifier>,
    tokenizer: Tokenizer,
    block_threshold: f64,
    escalation_threshold: f64,
    inference_timeout: Duration,
    enabled: bool,
}

impl ToxicityDetector {
    pub fn new(classifier: Arc<dyn SequenceClassifier>, tokenizer: Tokenizer) -> Self {
        Self {
            classifier,
            tokenizer,
            block_threshold: super::injection_classifier::DEFAULT_BLOCK_THRESHOLD,
            escalation_threshold: super::injection_classifier::DEFAULT_ESCALATION_THRESHOLD,
            inference_timeout: Duration::from_millis(
                super::injection_classifier::DEFAULT_INFERENCE_TIMEOUT_MS,
            ),
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

impl DetectorInfo for ToxicityDetector {
    fn name(&self) -> &str {
        "L2Toxicity"
    }

    fn layer(&self) -> DetectorLayer {
        DetectorLayer::L2
    }

    fn order(&self) -> u32 {
        ORDER_TOXICITY
    }

    fn enabled(&self) -> bool {
        self.enabled
    }
}

#[async_trait]
impl OutputDetector for ToxicityDetector {
    async fn check(
        &self,
        ctx: &CheckContext,
        output: &str,
    ) -> Result<DetectorVerdict, DetectorError> {
        let started = Instant::now();
        let encoded = self.tokenizer.encode(output);

        let scores = match tokio::time::timeout(
            self.inference_timeout,
            self.classifier.classify(&encoded),
        )
        .await
        {
            Ok(Ok(scores)) => scores,
            Ok(Err(e)) => {
                warn!(request_id = %ctx.request_id, error = %e, "toxicity classifier failed, passing");
                let mut v = DetectorVerdict::pass(self.name(), self.layer());
                v.latency_ms = started.elapsed().as_millis() as u64;
                v.details = Some("classifier unavailable".to_string());
                return Ok(v);
            }
            Err(_) => {
                warn!(request_id = %ctx.request_id, "toxicity classifier timed out, passing");
                let mut v = DetectorVerdict::pass(self.name(), self.layer());
                v.latency_ms = started.elapsed().as_millis() as u64;
                v.details = Some("classifier timeout".to_string());
                return Ok(v);
            }
        };

        // Max over the known label set; sigmoid outputs are independent.
        let (label, probability) = TOXICITY_LABELS
            .iter()
            .filter_map(|label| scores.get(*label).map(|p| (*label, p.clamp(0.0, 1.0))))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap_or(("toxicity", 0.0));

        let latency_ms = started.elapsed().as_millis() as u64;
        let details = format!("max category {label} = {probability:.3}");

        let verdict = if probability >= self.block_threshold {
            DetectorVerdict {
                detector: self.name().to_string(),
                layer: self.layer(),
                passed: false,
                score: probability,
                severity: Severity::Critical,
                pattern: Some(label.to_string()),
                matched_text: None,
                details: Some(details),
                needs_escalation: false,
                latency_ms,
            }
        } else if probability >= self.escalation_threshold {
            DetectorVerdict {
                detector: self.name().to_string(),
                layer: self.layer(),
                passed: true,
                score: probability,
                severity: Severity::Medium,
                pattern: Some(label.to_string()),
                matched_text: None,
                details: Some(details),
                needs_escalation: true,
                latency_ms,
            }
        } else {
            let mut v = DetectorVerdict::pass(self.name(), self.layer());
            v.score = probability;
            v.latency_ms = latency_ms;
            v
        };
        Ok(verdict)
    }
}
