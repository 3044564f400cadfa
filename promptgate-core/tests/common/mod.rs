#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use promptgate_core::classifier::{
    ClassifierError, LabelScores, SequenceClassifier, TokenizedInput,
};
use promptgate_core::judge::{CompletionRequest, CompletionResponse, CompletionService};

/// Completion backend that always returns the same content and counts calls.
pub struct ScriptedCompletionService {
    content: String,
    succeed: bool,
    calls: AtomicU32,
}

impl ScriptedCompletionService {
    pub fn returning(content: &str) -> Arc<Self> {
        Arc::new(Self {
            content: content.to_string(),
            succeed: true,
            calls: AtomicU32::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            content: String::new(),
            succeed: false,
            calls: AtomicU32::new(0),
        })
    }

    pub fn safe_verdict() -> Arc<Self> {
        Self::returning(
            r#"{"is_safe": true, "confidence": 0.05, "severity": "none",
                "categories": [], "reasoning": "benign"}"#,
        )
    }

    pub fn unsafe_verdict() -> Arc<Self> {
        Self::returning(
            r#"{"is_safe": false, "confidence": 0.95, "severity": "critical",
                "categories": ["prompt_injection"], "reasoning": "override attempt"}"#,
        )
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletionService {
    async fn complete(&self, request: CompletionRequest) -> CompletionResponse {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.succeed {
            CompletionResponse {
                success: true,
                content: self.content.clone(),
                error: None,
                model: request.model,
                prompt_tokens: 20,
                completion_tokens: 10,
                latency_ms: 2,
            }
        } else {
            CompletionResponse::failure("backend down", &request.model, 2)
        }
    }
}

/// Classifier returning fixed probabilities per label.
pub struct FixedClassifier {
    scores: Vec<(String, f64)>,
}

impl FixedClassifier {
    pub fn new(scores: &[(&str, f64)]) -> Arc<Self> {
        Arc::new(Self {
            scores: scores
                .iter()
                .map(|(label, p)| (label.to_string(), *p))
                .collect(),
        })
    }

    pub fn injection(p: f64) -> Arc<Self> {
        Self::new(&[("safe", 1.0 - p), ("injection", p)])
    }
}

#[async_trait]
impl SequenceClassifier for FixedClassifier {
    async fn classify(&self, _input: &TokenizedInput) -> Result<LabelScores, ClassifierError> {
        Ok(self.scores.iter().cloned().collect())
    }
}

/// Classifier that always errors, for fail-open tests.
pub struct BrokenClassifier;

#[async_trait]
impl SequenceClassifier for BrokenClassifier {
    async fn classify(&self, _input: &TokenizedInput) -> Result<LabelScores, ClassifierError> {
        Err(ClassifierError::Inference("weights missing".to_string()))
    }
}
