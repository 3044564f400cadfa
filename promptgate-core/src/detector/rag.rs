//! L3 RAG document security detector.
//!
//! Runs only when the context carries retrieved documents. Each document is
//! validated against the indirect-injection bank; the aggregate verdict
//! suggests Block, Sanitize or Review depending on the strongest match.

use std::time::Instant;

use async_trait::async_trait;

use super::{DetectorError, DetectorInfo, InputDetector, ORDER_RAG};
use crate::context::CheckContext;
use crate::judge::severity_from_score;
use crate::pattern::{banks::CAT_RAG_INJECTION, PatternEngine};
use crate::verdict::{truncate_match, DetectorLayer, DetectorVerdict};

/// Suggested handling for a risky document set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentAction {
    Block,
    Sanitize,
    Review,
}

impl DocumentAction {
    fn from_max_confidence(max: f64) -> Self {
        if max >= 0.8 {
            Self::Block
        } else if max >= 0.6 {
            Self::Sanitize
        } else {
            Self::Review
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Block => "Block",
            Self::Sanitize => "Sanitize",
            Self::Review => "Review",
        }
    }
}

pub struct RagDocumentDetector {
    engine: PatternEngine,
    enabled: bool,
}

impl RagDocumentDetector {
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

impl DetectorInfo for RagDocumentDetector {
    fn name(&self) -> &str {
        "L3RagDocumentSecurity"
    }

    fn layer(&self) -> DetectorLayer {
        DetectorLayer::L3
    }

    fn order(&self) -> u32 {
        ORDER_RAG
    }

    fn enabled(&self) -> bool {
        self.enabled
    }
}

#[async_trait]
impl InputDetector for RagDocumentDetector {
    async fn check(&self, ctx: &CheckContext) -> Result<DetectorVerdict, DetectorError> {
        let started = Instant::now();
        let documents = ctx.rag_documents();
        if documents.is_empty() {
            let mut v = DetectorVerdict::pass(self.name(), self.layer());
            v.latency_ms = started.elapsed().as_millis() as u64;
            return Ok(v);
        }

        // Per-document strongest confidence; clean documents contribute 0.
        let mut doc_confidences = Vec::with_capacity(documents.len());
        let mut strongest: Option<(f64, String, String)> = None;
        for (index, document) in documents.iter().enumerate() {
            let matches = self.engine.match_all(document, CAT_RAG_INJECTION);
            let doc_max = matches
                .iter()
                .map(|m| m.confidence)
                .fold(0.0_f64, f64::max);
            doc_confidences.push(doc_max);

            if let Some(best) = super::best_match(&matches) {
                let replace = strongest
                    .as_ref()
                    .map(|(c, _, _)| best.confidence > *c)
                    .unwrap_or(true);
                if replace {
                    strongest = Some((
                        best.confidence,
                        best.pattern_name.clone(),
                        format!(
                            "document {index}: {}",
                            truncate_match(&best.matched_text, 60)
                        ),
                    ));
                }
            }
        }

        let latency_ms = started.elapsed().as_millis() as u64;
        let Some((max_confidence, pattern, matched)) = strongest else {
            let mut v = DetectorVerdict::pass(self.name(), self.layer());
            v.latency_ms = latency_ms;
            return Ok(v);
        };

        let mean_confidence = doc_confidences.iter().sum::<f64>() / doc_confidences.len() as f64;
        let risk = (mean_confidence + 0.2).min(1.0);
        let action = DocumentAction::from_max_confidence(max_confidence);

        Ok(DetectorVerdict {
            detector: self.name().to_string(),
            layer: self.layer(),
            passed: action != DocumentAction::Block,
            score: risk,
            severity: severity_from_score(max_confidence),
            pattern: Some(pattern),
            matched_text: Some(matched),
            details: Some(format!(
                "{} document(s), suggested action: {}",
                documents.len(),
                action.as_str()
            )),
            needs_escalation: (0.5..0.7).contains(&max_confidence),
            latency_ms,
        })
    }
}
