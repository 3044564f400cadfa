//! PromptGate: guardrail middleware for LLM applications.
//!
//! Sits between an application and a model, inspecting prompts before they
//! reach the model and generated text before it reaches the user. Checks are
//! layered by cost: L1 regex/pattern rules, L2 local classifiers, L3 remote
//! LLM-as-judge, with a concurrent semantic cache eliding redundant
//! judgments and a streaming orchestrator validating output chunk by chunk.
//!
//! # Architecture
//!
//! - **normalize**: Unicode canonicalization that defeats obfuscation
//! - **pattern**: named regex rules, category registry, bounded evaluation
//! - **detector**: the concrete input/output/streaming detectors
//! - **judge**: LLM-as-judge over a completion-service abstraction
//! - **cache**: fingerprint-keyed judgment cache with TTL
//! - **pipeline**: the orchestrator, aggregator, hooks and fail-mode policy
//! - **stream**: chunk-by-chunk output validation

pub mod cache;
pub mod classifier;
pub mod config;
pub mod context;
pub mod detector;
pub mod judge;
pub mod normalize;
pub mod pattern;
pub mod pipeline;
pub mod stats;
pub mod stream;
pub mod verdict;

pub use cache::{CacheConfig, CacheStats, SemanticCache};
pub use config::{ConfigError, DetectorToggles, FailMode, GuardConfig, Preset};
pub use context::{CancelToken, ChatMessage, CheckContext};
pub use judge::{CompletionRequest, CompletionResponse, CompletionService, GuardType, Judgment};
pub use normalize::{NormalizationReport, NormalizerConfig, TextNormalizer};
pub use pipeline::hooks::{GuardHooks, HookOutcome};
pub use pipeline::{GuardError, GuardPipeline, GuardPipelineBuilder};
pub use stats::{InMemoryStatsCollector, StatsCollector, StatsSnapshot};
pub use stream::{ChunkResult, StreamOptions};
pub use verdict::{
    Decision, DetectorLayer, DetectorVerdict, GuardResult, Severity, TriggeredDetector,
};
