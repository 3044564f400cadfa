//! Guard configuration: one flat options record plus preset defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::judge::JudgeConfig;
use crate::normalize::NormalizerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("config file not found: {0}")]
    FileNotFound(String),
    #[error("failed to parse config JSON: {0}")]
    Parse(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Detector bundle and threshold defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// Fast pattern checks only.
    Minimal,
    /// Pattern checks plus local classifiers; judge on escalation.
    #[default]
    Standard,
    /// Everything on, lower thresholds, always-on judge.
    Strict,
}

/// What to do when a detector or dependency fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    #[default]
    Open,
    Closed,
}

/// Per-detector enable flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorToggles {
    pub prompt_injection: bool,
    pub jailbreak: bool,
    pub encoding: bool,
    pub pii: bool,
    pub refusal: bool,
    pub injection_classifier: bool,
    pub toxicity: bool,
    pub rag_documents: bool,
    pub groundedness: bool,
    pub llm_judge: bool,
}

impl Default for DetectorToggles {
    fn default() -> Self {
        Self::standard()
    }
}

impl DetectorToggles {
    pub fn minimal() -> Self {
        Self {
            prompt_injection: true,
            jailbreak: true,
            encoding: true,
            pii: true,
            refusal: false,
            injection_classifier: false,
            toxicity: false,
            rag_documents: false,
            groundedness: false,
            llm_judge: false,
        }
    }

    pub fn standard() -> Self {
        Self {
            prompt_injection: true,
            jailbreak: true,
            encoding: true,
            pii: true,
            refusal: true,
            injection_classifier: true,
            toxicity: true,
            rag_documents: true,
            groundedness: false,
            llm_judge: false,
        }
    }

    pub fn strict() -> Self {
        Self {
            prompt_injection: true,
            jailbreak: true,
            encoding: true,
            pii: true,
            refusal: true,
            injection_classifier: true,
            toxicity: true,
            rag_documents: true,
            groundedness: true,
            llm_judge: true,
        }
    }
}

/// The single flat configuration record for the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub preset: Preset,
    pub fail_mode: FailMode,

    /// Aggregator cut-offs.
    pub block_threshold: f64,
    pub flag_threshold: f64,
    pub escalation_threshold: f64,

    /// Budget for the whole detector chain of one request.
    pub guard_timeout_ms: u64,
    /// Budget for the inline remote-judge escalation.
    pub escalation_timeout_ms: u64,
    /// Per-regex evaluation budget.
    pub match_budget_ms: u64,

    pub detectors: DetectorToggles,

    /// Locale tags selecting PII banks (e.g. "en-US", "ko-KR", "ja-JP").
    pub supported_languages: Vec<String>,

    pub normalizer: NormalizerConfig,

    /// Invisible-character count at which encoding bypass blocks.
    pub invisible_limit: usize,
    /// Homoglyph count at which encoding bypass blocks.
    pub homoglyph_limit: usize,

    pub cache: CacheConfig,
    pub judge: JudgeConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl GuardConfig {
    pub fn minimal() -> Self {
        Self {
            preset: Preset::Minimal,
            detectors: DetectorToggles::minimal(),
            ..Self::standard()
        }
    }

    pub fn standard() -> Self {
        Self {
            preset: Preset::Standard,
            fail_mode: FailMode::Open,
            block_threshold: 0.9,
            flag_threshold: 0.7,
            escalation_threshold: 0.5,
            guard_timeout_ms: 5_000,
            escalation_timeout_ms: 5_000,
            match_budget_ms: 100,
            detectors: DetectorToggles::standard(),
            supported_languages: vec!["en-US".to_string()],
            normalizer: NormalizerConfig::default(),
            invisible_limit: crate::detector::encoding::DEFAULT_INVISIBLE_LIMIT,
            homoglyph_limit: crate::detector::encoding::DEFAULT_HOMOGLYPH_LIMIT,
            cache: CacheConfig::default(),
            judge: JudgeConfig::default(),
        }
    }

    pub fn strict() -> Self {
        Self {
            preset: Preset::Strict,
            block_threshold: 0.8,
            flag_threshold: 0.5,
            escalation_threshold: 0.3,
            detectors: DetectorToggles::strict(),
            ..Self::standard()
        }
    }

    pub fn for_preset(preset: Preset) -> Self {
        match preset {
            Preset::Minimal => Self::minimal(),
            Preset::Standard => Self::standard(),
            Preset::Strict => Self::strict(),
        }
    }

    /// Validate at startup so bad thresholds fail construction, not a
    /// request at 3am.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("block_threshold", self.block_threshold),
            ("flag_threshold", self.flag_threshold),
            ("escalation_threshold", self.escalation_threshold),
        ] {
            if value.is_nan() || !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.block_threshold < self.flag_threshold
            || self.flag_threshold < self.escalation_threshold
        {
            return Err(ConfigError::Invalid(
                "thresholds must satisfy block >= flag >= escalation".to_string(),
            ));
        }
        if self.guard_timeout_ms == 0 || self.escalation_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be > 0".to_string()));
        }
        if self.match_budget_ms == 0 {
            return Err(ConfigError::Invalid(
                "match_budget_ms must be > 0".to_string(),
            ));
        }
        if self.invisible_limit == 0 || self.homoglyph_limit == 0 {
            return Err(ConfigError::Invalid(
                "encoding limits must be > 0".to_string(),
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_entries must be > 0".to_string(),
            ));
        }
        if self.judge.temperature.is_nan() || self.judge.temperature < 0.0 {
            return Err(ConfigError::Invalid(
                "judge.temperature must be >= 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Load from a JSON file. Missing keys take the Standard defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn standard_defaults_match_contract() {
        let config = GuardConfig::standard();
        assert_eq!(config.block_threshold, 0.9);
        assert_eq!(config.flag_threshold, 0.7);
        assert_eq!(config.escalation_threshold, 0.5);
        assert_eq!(config.fail_mode, FailMode::Open);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn strict_lowers_thresholds() {
        let config = GuardConfig::strict();
        assert_eq!(config.block_threshold, 0.8);
        assert_eq!(config.flag_threshold, 0.5);
        assert_eq!(config.escalation_threshold, 0.3);
        assert!(config.detectors.llm_judge);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn minimal_disables_model_layers() {
        let config = GuardConfig::minimal();
        assert!(!config.detectors.injection_classifier);
        assert!(!config.detectors.toxicity);
        assert!(!config.detectors.llm_judge);
        assert!(config.detectors.prompt_injection);
    }

    #[test]
    fn nan_threshold_is_rejected() {
        let mut config = GuardConfig::standard();
        config.flag_threshold = f64::NAN;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let mut config = GuardConfig::standard();
        config.flag_threshold = 0.95;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut config = GuardConfig::standard();
        config.guard_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn loads_partial_json_file() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(
            tmp,
            r#"{{ "preset": "strict", "block_threshold": 0.85, "supported_languages": ["ko-KR"] }}"#
        )
        .unwrap();

        let config = GuardConfig::from_file(tmp.path()).unwrap();
        assert_eq!(config.preset, Preset::Strict);
        assert_eq!(config.block_threshold, 0.85);
        assert_eq!(config.supported_languages, vec!["ko-KR"]);
        // Unspecified fields keep defaults.
        assert_eq!(config.guard_timeout_ms, 5_000);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = GuardConfig::from_file("/nonexistent/promptgate.json").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn invalid_json_is_reported() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(tmp, "NOT JSON").unwrap();
        let err = GuardConfig::from_file(tmp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
