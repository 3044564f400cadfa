//! Core verdict and result types shared by every detector and both pipelines.

use serde::{Deserialize, Serialize};

/// Severity of a detection, totally ordered.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    None,
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Info => write!(f, "info"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl Severity {
    /// Parse a severity from free text (case-insensitive). Unknown strings
    /// map to `Medium` so that a sloppy remote judge still produces a usable
    /// signal rather than silently passing.
    pub fn from_str_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "none" => Self::None,
            "info" | "informational" => Self::Info,
            "low" => Self::Low,
            "medium" | "moderate" => Self::Medium,
            "high" => Self::High,
            "critical" => Self::Critical,
            _ => Self::Medium,
        }
    }
}

/// Final decision of a guard run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Pass,
    Flag,
    Escalate,
    Block,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Flag => write!(f, "flag"),
            Self::Escalate => write!(f, "escalate"),
            Self::Block => write!(f, "block"),
        }
    }
}

/// Cost/latency tier a detector belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectorLayer {
    /// Rule/regex checks, sub-millisecond.
    L1,
    /// Local classifier inference, single-digit to tens of milliseconds.
    L2,
    /// Remote LLM judge, tens to hundreds of milliseconds.
    L3,
}

impl std::fmt::Display for DetectorLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::L1 => write!(f, "L1"),
            Self::L2 => write!(f, "L2"),
            Self::L3 => write!(f, "L3"),
        }
    }
}

/// Output of a single detector invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorVerdict {
    pub detector: String,
    pub layer: DetectorLayer,
    pub passed: bool,
    /// Confidence that the content is a threat, in [0, 1].
    pub score: f64,
    pub severity: Severity,
    /// Name of the pattern that fired, when pattern-based.
    pub pattern: Option<String>,
    /// Matched text, already masked where sensitive.
    pub matched_text: Option<String>,
    pub details: Option<String>,
    pub needs_escalation: bool,
    pub latency_ms: u64,
}

impl DetectorVerdict {
    /// A clean pass with no signal.
    pub fn pass(detector: impl Into<String>, layer: DetectorLayer) -> Self {
        Self {
            detector: detector.into(),
            layer,
            passed: true,
            score: 0.0,
            severity: Severity::None,
            pattern: None,
            matched_text: None,
            details: None,
            needs_escalation: false,
            latency_ms: 0,
        }
    }
}

/// Projection of a verdict kept in the final result. Internal reasoning
/// prompts and raw match material never survive into this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggeredDetector {
    pub detector: String,
    pub layer: DetectorLayer,
    pub score: f64,
    pub severity: Severity,
    pub pattern: Option<String>,
    pub matched_text: Option<String>,
    pub details: Option<String>,
}

impl From<&DetectorVerdict> for TriggeredDetector {
    fn from(v: &DetectorVerdict) -> Self {
        Self {
            detector: v.detector.clone(),
            layer: v.layer,
            score: v.score,
            severity: v.severity,
            pattern: v.pattern.clone(),
            matched_text: v.matched_text.clone(),
            details: v.details.clone(),
        }
    }
}

/// Final decision record returned by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardResult {
    pub request_id: String,
    pub decision: Decision,
    /// Aggregate threat score, >= every triggered detector's score.
    pub score: f64,
    pub max_severity: Severity,
    /// Triggered detectors in invocation order.
    pub triggered: Vec<TriggeredDetector>,
    pub block_reason: Option<String>,
    pub latency_ms: u64,
}

impl GuardResult {
    pub fn passed(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            decision: Decision::Pass,
            score: 0.0,
            max_severity: Severity::None,
            triggered: Vec::new(),
            block_reason: None,
            latency_ms: 0,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.decision == Decision::Block
    }
}

/// Mask sensitive matched text for reports and logs.
///
/// Keeps the first two and last two characters, replacing the middle with
/// asterisks; anything shorter than four characters becomes `"****"`.
/// Operates on characters, never bytes, so multi-byte input cannot panic.
pub fn mask_sensitive(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() < 4 {
        return "****".to_string();
    }
    let mut masked = String::with_capacity(chars.len());
    masked.extend(&chars[..2]);
    masked.extend(std::iter::repeat('*').take(chars.len() - 4));
    masked.extend(&chars[chars.len() - 2..]);
    masked
}

/// Truncate free-form matched text for inclusion in a verdict. Not a mask:
/// use [`mask_sensitive`] for anything that could carry a secret.
pub fn truncate_match(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}…")
}
