//! Named, categorized regex rules and their evaluation.

pub mod banks;
pub mod engine;
pub mod registry;

pub use engine::PatternEngine;
pub use registry::PatternRegistry;

use regex::Regex;
use thiserror::Error;

use crate::verdict::Severity;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("invalid regex for pattern '{id}': {source}")]
    InvalidRegex {
        id: String,
        #[source]
        source: regex::Error,
    },
    #[error("confidence {0} outside [0, 1]")]
    InvalidConfidence(f64),
}

/// A named detection rule with a compiled matcher.
#[derive(Debug)]
pub struct PatternDefinition {
    pub id: String,
    /// Human-readable name reported in verdicts (e.g. `IgnoreInstructions`).
    pub name: String,
    pub regex: Regex,
    pub severity: Severity,
    /// Base confidence assigned to matches, in [0, 1].
    pub confidence: f64,
    pub description: Option<String>,
    pub enabled: bool,
}

impl PatternDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        pattern: &str,
        severity: Severity,
        confidence: f64,
    ) -> Result<Self, PatternError> {
        let id = id.into();
        if !(0.0..=1.0).contains(&confidence) {
            return Err(PatternError::InvalidConfidence(confidence));
        }
        let regex = Regex::new(pattern).map_err(|source| PatternError::InvalidRegex {
            id: id.clone(),
            source,
        })?;
        Ok(Self {
            id,
            name: name.into(),
            regex,
            severity,
            confidence,
            description: None,
            enabled: true,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A span produced by the pattern engine.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub pattern_id: String,
    pub pattern_name: String,
    /// Raw matched text. Detectors mask this before it enters any verdict.
    pub matched_text: String,
    pub byte_offset: usize,
    pub char_offset: usize,
    /// Length of the match in bytes.
    pub length: usize,
    pub severity: Severity,
    pub confidence: f64,
    /// True for the synthetic match emitted when a pattern blew its
    /// evaluation budget; a potential-threat signal, not a certainty.
    pub timed_out: bool,
}
