//! Per-request check context and cancellation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::normalize::NormalizationReport;

/// Metadata key under which RAG documents are passed (JSON array of strings).
pub const META_RAG_DOCUMENTS: &str = "rag_documents";
/// Metadata key carrying the grounding context for hallucination checks.
pub const META_GROUNDING_CONTEXT: &str = "grounding_context";

/// Cooperative cancellation flag, cheap to clone and share.
///
/// The pipeline checks it before each detector; a cancelled request
/// propagates [`crate::GuardError::Cancelled`] instead of producing a result.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// A single prior message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Immutable per-request record handed to the pipeline.
///
/// The normalized form of the input is written exactly once, by the
/// normalizer, before any detector runs; `OnceLock` makes a second write a
/// programming error rather than a data race.
#[derive(Debug)]
pub struct CheckContext {
    pub request_id: String,
    pub input: String,
    normalization: OnceLock<NormalizationReport>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub history: Vec<ChatMessage>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub timestamp: SystemTime,
    pub cancel: CancelToken,
}

impl CheckContext {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            input: input.into(),
            normalization: OnceLock::new(),
            user_id: None,
            session_id: None,
            history: Vec::new(),
            metadata: HashMap::new(),
            timestamp: SystemTime::now(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = id.into();
        self
    }

    pub fn with_user_id(mut self, id: impl Into<String>) -> Self {
        self.user_id = Some(id.into());
        self
    }

    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Attach the normalization outcome. Returns an error if already set;
    /// only the pipeline's normalization step may call this.
    pub fn set_normalization(&self, report: NormalizationReport) -> Result<(), NormalizationReport> {
        self.normalization.set(report)
    }

    pub fn normalization(&self) -> Option<&NormalizationReport> {
        self.normalization.get()
    }

    /// Normalized input if the normalizer ran, the raw input otherwise.
    pub fn effective_input(&self) -> &str {
        self.normalization
            .get()
            .map(|r| r.text.as_str())
            .unwrap_or(&self.input)
    }

    /// RAG documents attached via metadata, if any.
    pub fn rag_documents(&self) -> Vec<String> {
        self.metadata
            .get(META_RAG_DOCUMENTS)
            .and_then(|v| v.as_array())
            .map(|docs| {
                docs.iter()
                    .filter_map(|d| d.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Grounding context attached via metadata, if any.
    pub fn grounding_context(&self) -> Option<&str> {
        self.metadata
            .get(META_GROUNDING_CONTEXT)
            .and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_is_write_once() {
        let ctx = CheckContext::new("hello");
        let report = NormalizationReport::untouched("hello");
        assert!(ctx.set_normalization(report.clone()).is_ok());
        assert!(ctx.set_normalization(report).is_err());
        assert_eq!(ctx.effective_input(), "hello");
    }

    #[test]
    fn effective_input_falls_back_to_raw() {
        let ctx = CheckContext::new("raw text");
        assert_eq!(ctx.effective_input(), "raw text");
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn rag_documents_from_metadata() {
        let ctx = CheckContext::new("q").with_metadata(
            META_RAG_DOCUMENTS,
            serde_json::json!(["doc one", "doc two"]),
        );
        assert_eq!(ctx.rag_documents(), vec!["doc one", "doc two"]);
    }

    #[test]
    fn grounding_context_absent_by_default() {
        let ctx = CheckContext::new("q");
        assert!(ctx.grounding_context().is_none());
        assert!(ctx.rag_documents().is_empty());
    }
}
