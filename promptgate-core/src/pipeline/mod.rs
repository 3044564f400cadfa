//! Pipeline orchestrator: runs detectors in order, applies hooks, aggregates
//! verdicts into a decision, enforces the fail-mode policy and records stats.
//!
//! Detectors run sequentially within one request so that early exit on a
//! high-severity block is observable and deterministic; the pipeline itself
//! is re-entrant and many requests may traverse it concurrently.

pub mod hooks;

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::SemanticCache;
use crate::classifier::{SequenceClassifier, Tokenizer};
use crate::config::{ConfigError, FailMode, GuardConfig};
use crate::context::CheckContext;
use crate::detector::encoding::EncodingBypassDetector;
use crate::detector::groundedness::GroundednessDetector;
use crate::detector::injection_classifier::InjectionClassifierDetector;
use crate::detector::jailbreak::JailbreakDetector;
use crate::detector::llm_judge::LlmJudgeDetector;
use crate::detector::pii::{PiiExposureDetector, PiiLeakageDetector, PiiStreamMode, StreamingPiiDetector};
use crate::detector::prompt_injection::PromptInjectionDetector;
use crate::detector::rag::RagDocumentDetector;
use crate::detector::refusal::RefusalDetector;
use crate::detector::toxicity::ToxicityDetector;
use crate::detector::{
    DetectorError, InputDetector, OutputDetector, StreamingDetector,
};
use crate::judge::{CompletionService, Judgment, RemoteJudge};
use crate::normalize::TextNormalizer;
use crate::pattern::{banks, PatternEngine, PatternRegistry};
use crate::stats::{InMemoryStatsCollector, StatsCollector};
use crate::stream::{guard_stream, ChunkStream, GuardedStream, StreamOptions};
use crate::verdict::{
    Decision, DetectorLayer, DetectorVerdict, GuardResult, Severity, TriggeredDetector,
};
use hooks::{GuardHooks, HookOutcome};

/// Errors surfaced to the caller. Everything else becomes a Guard Result.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("check cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

/// Running accumulation over a detector chain.
#[derive(Default)]
struct Accumulator {
    triggered: Vec<TriggeredDetector>,
    max_score: f64,
    max_severity: Severity,
    needs_escalation: bool,
    block_reason: Option<String>,
}

impl Accumulator {
    /// Fold in a verdict. Returns true when iteration must stop (a
    /// non-passed verdict at High severity or above).
    fn absorb(&mut self, verdict: &DetectorVerdict) -> bool {
        if !verdict.passed || verdict.score > 0.0 {
            self.triggered.push(TriggeredDetector::from(verdict));
        }
        self.max_score = self.max_score.max(verdict.score);
        self.max_severity = self.max_severity.max(verdict.severity);
        self.needs_escalation |= verdict.needs_escalation;

        if !verdict.passed && verdict.severity >= Severity::High {
            let what = verdict
                .details
                .clone()
                .or_else(|| verdict.pattern.clone())
                .unwrap_or_else(|| "blocked".to_string());
            self.block_reason = Some(format!("{}: {}", verdict.detector, what));
            return true;
        }
        false
    }

    /// The aggregator of §4.4, verbatim.
    fn aggregate(self, request_id: &str, config: &GuardConfig, l3_enabled: bool) -> GuardResult {
        let (decision, block_reason) = if self.block_reason.is_some() {
            (Decision::Block, self.block_reason)
        } else if self.max_score >= config.block_threshold {
            let reason = self
                .triggered
                .first()
                .and_then(|t| t.details.clone())
                .unwrap_or_else(|| "Threshold exceeded".to_string());
            (Decision::Block, Some(reason))
        } else if self.needs_escalation
            && l3_enabled
            && self.max_score >= config.escalation_threshold
        {
            (Decision::Escalate, None)
        } else if self.max_score >= config.flag_threshold {
            (Decision::Flag, None)
        } else {
            (Decision::Pass, None)
        };

        GuardResult {
            request_id: request_id.to_string(),
            decision,
            score: self.max_score,
            max_severity: self.max_severity,
            triggered: self.triggered,
            block_reason,
            latency_ms: 0,
        }
    }
}

enum ErrorFlow {
    Continue,
    Stop,
    Override(GuardResult),
}

/// The guard pipeline. Construct with [`GuardPipelineBuilder`] or
/// [`GuardPipeline::from_config`].
pub struct GuardPipeline {
    config: GuardConfig,
    normalizer: TextNormalizer,
    registry: Arc<PatternRegistry>,
    cache: Arc<SemanticCache>,
    judge: Option<Arc<RemoteJudge>>,
    input_detectors: Vec<Arc<dyn InputDetector>>,
    output_detectors: Vec<Arc<dyn OutputDetector>>,
    streaming_detectors: Vec<Arc<dyn StreamingDetector>>,
    hooks: GuardHooks,
    stats: Arc<dyn StatsCollector>,
}

impl GuardPipeline {
    /// Pipeline from options alone: L1 detectors only, no external
    /// collaborators.
    pub fn from_config(config: GuardConfig) -> Result<Self, ConfigError> {
        GuardPipelineBuilder::new(config).build()
    }

    pub fn builder(config: GuardConfig) -> GuardPipelineBuilder {
        GuardPipelineBuilder::new(config)
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PatternRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<SemanticCache> {
        &self.cache
    }

    pub fn stats(&self) -> &Arc<dyn StatsCollector> {
        &self.stats
    }

    fn l3_enabled(&self) -> bool {
        self.judge.is_some()
    }

    /// Guard a user input before it reaches the model.
    pub async fn check_input(&self, ctx: &CheckContext) -> Result<GuardResult, GuardError> {
        let started = Instant::now();

        if let Some(hook) = &self.hooks.on_before_check {
            if !hook(ctx) {
                debug!(request_id = %ctx.request_id, "check short-circuited by hook");
                let mut result = GuardResult::passed(&ctx.request_id);
                result.latency_ms = started.elapsed().as_millis() as u64;
                return Ok(result);
            }
        }

        // The normalizer runs exactly once, before any detector.
        if ctx.normalization().is_none() {
            let report = self.normalizer.normalize(&ctx.input);
            let _ = ctx.set_normalization(report);
        }

        let deadline = started + Duration::from_millis(self.config.guard_timeout_ms);
        let mut acc = Accumulator::default();

        for detector in &self.input_detectors {
            if !detector.enabled() {
                continue;
            }
            if ctx.cancel.is_cancelled() {
                return Err(GuardError::Cancelled);
            }

            let outcome = run_with_deadline(deadline, detector.check(ctx)).await;
            match outcome {
                Ok(verdict) => {
                    self.stats.record_detector(
                        detector.name(),
                        detector.layer(),
                        verdict.latency_ms,
                        !verdict.passed,
                    );
                    if acc.absorb(&verdict) {
                        break;
                    }
                }
                Err(error) => {
                    self.stats.record_error(detector.name(), detector.layer());
                    match self.handle_detector_error(ctx, detector.name(), &error, &mut acc) {
                        ErrorFlow::Continue => continue,
                        ErrorFlow::Stop => break,
                        ErrorFlow::Override(result) => {
                            return Ok(self.finish(ctx, result, started, true));
                        }
                    }
                }
            }
        }

        let mut result = acc.aggregate(&ctx.request_id, &self.config, self.l3_enabled());

        if let Some(hook) = &self.hooks.on_custom_decision {
            if let HookOutcome::Override(replacement) = hook(ctx, &result) {
                result = replacement;
            }
        }

        if result.decision == Decision::Escalate {
            result = self.escalate(ctx, result, None).await;
        }

        Ok(self.finish(ctx, result, started, true))
    }

    /// Guard a model output before it reaches the user. The output is
    /// assumed to be the model's canonical text; no normalization step.
    pub async fn check_output(
        &self,
        ctx: &CheckContext,
        output: &str,
    ) -> Result<GuardResult, GuardError> {
        let started = Instant::now();

        if let Some(hook) = &self.hooks.on_before_check {
            if !hook(ctx) {
                let mut result = GuardResult::passed(&ctx.request_id);
                result.latency_ms = started.elapsed().as_millis() as u64;
                return Ok(result);
            }
        }

        let deadline = started + Duration::from_millis(self.config.guard_timeout_ms);
        let mut acc = Accumulator::default();

        for detector in &self.output_detectors {
            if !detector.enabled() {
                continue;
            }
            if ctx.cancel.is_cancelled() {
                return Err(GuardError::Cancelled);
            }

            let outcome = run_with_deadline(deadline, detector.check(ctx, output)).await;
            match outcome {
                Ok(verdict) => {
                    self.stats.record_detector(
                        detector.name(),
                        detector.layer(),
                        verdict.latency_ms,
                        !verdict.passed,
                    );
                    if acc.absorb(&verdict) {
                        break;
                    }
                }
                Err(error) => {
                    self.stats.record_error(detector.name(), detector.layer());
                    match self.handle_detector_error(ctx, detector.name(), &error, &mut acc) {
                        ErrorFlow::Continue => continue,
                        ErrorFlow::Stop => break,
                        ErrorFlow::Override(result) => {
                            return Ok(self.finish(ctx, result, started, false));
                        }
                    }
                }
            }
        }

        let mut result = acc.aggregate(&ctx.request_id, &self.config, self.l3_enabled());

        if let Some(hook) = &self.hooks.on_custom_decision {
            if let HookOutcome::Override(replacement) = hook(ctx, &result) {
                result = replacement;
            }
        }

        if result.decision == Decision::Escalate {
            result = self.escalate(ctx, result, Some(output)).await;
        }

        Ok(self.finish(ctx, result, started, false))
    }

    /// Wrap an output chunk stream in streaming validation.
    pub fn check_stream(&self, ctx: Arc<CheckContext>, chunks: ChunkStream) -> GuardedStream {
        guard_stream(
            ctx,
            self.streaming_detectors.clone(),
            StreamOptions::default(),
            chunks,
        )
    }

    /// Inline remote-judge escalation, bounded by the escalation timeout.
    async fn escalate(
        &self,
        ctx: &CheckContext,
        local: GuardResult,
        output: Option<&str>,
    ) -> GuardResult {
        let Some(judge) = &self.judge else {
            return local;
        };
        if let Some(hook) = &self.hooks.on_before_escalation {
            if !hook(ctx, &local) {
                debug!(request_id = %ctx.request_id, "escalation skipped by hook");
                return local;
            }
        }

        let l2_context = if local.triggered.is_empty() {
            None
        } else {
            Some(
                local
                    .triggered
                    .iter()
                    .map(|t| t.detector.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        };

        let timeout = Duration::from_millis(self.config.escalation_timeout_ms);
        let judgment = match output {
            Some(output) => {
                tokio::time::timeout(
                    timeout,
                    judge.check_output(ctx, output, l2_context.as_deref()),
                )
                .await
            }
            None => {
                tokio::time::timeout(timeout, judge.check_input(ctx, l2_context.as_deref())).await
            }
        };

        match judgment {
            Ok(judgment) => self.merge_judgment(local, judgment),
            Err(_) => {
                warn!(
                    request_id = %ctx.request_id,
                    timeout_ms = self.config.escalation_timeout_ms,
                    "escalation timed out"
                );
                match &self.hooks.on_escalation_timeout {
                    Some(hook) => hook(ctx, &local),
                    None => {
                        // Local analysis was uncertain and the judge never
                        // answered; degrade to Flag rather than guess.
                        let mut result = local;
                        result.decision = Decision::Flag;
                        result
                    }
                }
            }
        }
    }

    /// Fold a judge verdict into the locally-aggregated result.
    fn merge_judgment(&self, mut local: GuardResult, judgment: Judgment) -> GuardResult {
        let passed = judgment.passed;
        if !passed || judgment.score > 0.0 {
            local.triggered.push(TriggeredDetector {
                detector: "L3LLMJudge".to_string(),
                layer: DetectorLayer::L3,
                score: judgment.score,
                severity: judgment.severity,
                pattern: judgment.categories.first().cloned(),
                matched_text: None,
                details: Some(judgment.reasoning.clone()),
            });
        }
        local.score = local.score.max(judgment.score);
        local.max_severity = local.max_severity.max(judgment.severity);

        local.decision = if !passed
            && (judgment.severity >= Severity::High
                || judgment.score >= self.config.judge.block_threshold)
        {
            local.block_reason = Some(format!("L3LLMJudge: {}", judgment.reasoning));
            Decision::Block
        } else if local.score >= self.config.block_threshold {
            local
                .block_reason
                .get_or_insert_with(|| "Threshold exceeded".to_string());
            Decision::Block
        } else if local.score >= self.config.flag_threshold {
            Decision::Flag
        } else {
            Decision::Pass
        };
        local
    }

    fn handle_detector_error(
        &self,
        ctx: &CheckContext,
        detector: &str,
        error: &DetectorError,
        acc: &mut Accumulator,
    ) -> ErrorFlow {
        if let Some(hook) = &self.hooks.on_guard_error {
            if let HookOutcome::Override(result) = hook(ctx, detector, error) {
                return ErrorFlow::Override(result);
            }
        }
        match self.config.fail_mode {
            FailMode::Open => {
                warn!(
                    request_id = %ctx.request_id,
                    detector,
                    error = %error,
                    "detector failed, continuing (fail-open)"
                );
                ErrorFlow::Continue
            }
            FailMode::Closed => {
                acc.block_reason = Some(format!("Guard error: {detector}"));
                acc.max_severity = acc.max_severity.max(Severity::Critical);
                acc.triggered.push(TriggeredDetector {
                    detector: detector.to_string(),
                    layer: DetectorLayer::L1,
                    score: 0.0,
                    severity: Severity::Critical,
                    pattern: None,
                    matched_text: None,
                    details: Some("detector error in fail-closed mode".to_string()),
                });
                ErrorFlow::Stop
            }
        }
    }

    /// Decision hooks, after hook, latency, stats.
    fn finish(
        &self,
        ctx: &CheckContext,
        mut result: GuardResult,
        started: Instant,
        is_input: bool,
    ) -> GuardResult {
        match result.decision {
            Decision::Block => {
                if let Some(hook) = &self.hooks.on_blocked {
                    hook(ctx, &result);
                }
            }
            Decision::Flag => {
                if let Some(hook) = &self.hooks.on_flagged {
                    hook(ctx, &result);
                }
            }
            Decision::Pass => {
                if let Some(hook) = &self.hooks.on_passed {
                    hook(ctx, &result);
                }
            }
            Decision::Escalate => {}
        }

        if let Some(hook) = &self.hooks.on_after_check {
            hook(ctx, &result);
        }

        result.latency_ms = started.elapsed().as_millis() as u64;
        self.stats.record_check(&result, is_input);

        debug!(
            request_id = %result.request_id,
            decision = %result.decision,
            score = result.score,
            severity = %result.max_severity,
            triggered = result.triggered.len(),
            latency_ms = result.latency_ms,
            "check complete"
        );
        result
    }
}

async fn run_with_deadline<F>(deadline: Instant, check: F) -> Result<DetectorVerdict, DetectorError>
where
    F: std::future::Future<Output = Result<DetectorVerdict, DetectorError>>,
{
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(DetectorError::Failed("guard timeout".to_string()));
    }
    match tokio::time::timeout(remaining, check).await {
        Ok(outcome) => outcome,
        Err(_) => Err(DetectorError::Failed("guard timeout".to_string())),
    }
}

/// Assembles a pipeline from the options record and optional collaborators.
pub struct GuardPipelineBuilder {
    config: GuardConfig,
    hooks: GuardHooks,
    tokenizer: Tokenizer,
    injection_classifier: Option<Arc<dyn SequenceClassifier>>,
    toxicity_classifier: Option<Arc<dyn SequenceClassifier>>,
    completion_service: Option<Arc<dyn CompletionService>>,
    stats: Option<Arc<dyn StatsCollector>>,
    streaming_pii_mode: PiiStreamMode,
    extra_input_detectors: Vec<Arc<dyn InputDetector>>,
    extra_output_detectors: Vec<Arc<dyn OutputDetector>>,
    extra_streaming_detectors: Vec<Arc<dyn StreamingDetector>>,
}

impl GuardPipelineBuilder {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            hooks: GuardHooks::default(),
            tokenizer: Tokenizer::default(),
            injection_classifier: None,
            toxicity_classifier: None,
            completion_service: None,
            stats: None,
            streaming_pii_mode: PiiStreamMode::Suppress,
            extra_input_detectors: Vec::new(),
            extra_output_detectors: Vec::new(),
            extra_streaming_detectors: Vec::new(),
        }
    }

    pub fn hooks(mut self, hooks: GuardHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn tokenizer(mut self, tokenizer: Tokenizer) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn injection_classifier(mut self, classifier: Arc<dyn SequenceClassifier>) -> Self {
        self.injection_classifier = Some(classifier);
        self
    }

    pub fn toxicity_classifier(mut self, classifier: Arc<dyn SequenceClassifier>) -> Self {
        self.toxicity_classifier = Some(classifier);
        self
    }

    pub fn completion_service(mut self, service: Arc<dyn CompletionService>) -> Self {
        self.completion_service = Some(service);
        self
    }

    pub fn stats(mut self, stats: Arc<dyn StatsCollector>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn streaming_pii_mode(mut self, mode: PiiStreamMode) -> Self {
        self.streaming_pii_mode = mode;
        self
    }

    /// Register an application-specific input detector. It joins the
    /// built-ins and runs at its own `order()`.
    pub fn add_input_detector(mut self, detector: Arc<dyn InputDetector>) -> Self {
        self.extra_input_detectors.push(detector);
        self
    }

    /// Register an application-specific output detector.
    pub fn add_output_detector(mut self, detector: Arc<dyn OutputDetector>) -> Self {
        self.extra_output_detectors.push(detector);
        self
    }

    /// Register an application-specific streaming detector.
    pub fn add_streaming_detector(mut self, detector: Arc<dyn StreamingDetector>) -> Self {
        self.extra_streaming_detectors.push(detector);
        self
    }

    pub fn build(self) -> Result<GuardPipeline, ConfigError> {
        let config = self.config;
        config.validate()?;

        let registry = Arc::new(PatternRegistry::new());
        seed_registry(&registry, &config);
        let engine = PatternEngine::new(registry.clone())
            .with_match_budget(Duration::from_millis(config.match_budget_ms));

        let cache = Arc::new(SemanticCache::new(config.cache.clone()));
        let judge = self.completion_service.map(|service| {
            Arc::new(RemoteJudge::new(service, cache.clone(), config.judge.clone()))
        });

        let toggles = &config.detectors;
        let languages = &config.supported_languages;

        let mut input_detectors: Vec<Arc<dyn InputDetector>> = Vec::new();
        if toggles.encoding {
            input_detectors.push(Arc::new(
                EncodingBypassDetector::new(engine.clone(), config.escalation_threshold)
                    .with_limits(config.invisible_limit, config.homoglyph_limit),
            ));
        }
        if toggles.prompt_injection {
            input_detectors.push(Arc::new(PromptInjectionDetector::new(
                engine.clone(),
                config.escalation_threshold,
            )));
        }
        if toggles.jailbreak {
            input_detectors.push(Arc::new(JailbreakDetector::new(
                engine.clone(),
                config.escalation_threshold,
            )));
        }
        if toggles.pii {
            input_detectors.push(Arc::new(PiiExposureDetector::new(engine.clone(), languages)));
        }
        if toggles.injection_classifier {
            if let Some(classifier) = &self.injection_classifier {
                input_detectors.push(Arc::new(
                    InjectionClassifierDetector::new(classifier.clone(), self.tokenizer.clone())
                        .with_thresholds(
                            crate::detector::injection_classifier::DEFAULT_BLOCK_THRESHOLD,
                            config.escalation_threshold,
                        ),
                ));
            }
        }
        if toggles.rag_documents {
            input_detectors.push(Arc::new(RagDocumentDetector::new(engine.clone())));
        }
        if toggles.llm_judge {
            if let Some(judge) = &judge {
                input_detectors.push(Arc::new(LlmJudgeDetector::new(judge.clone())));
            }
        }
        input_detectors.extend(self.extra_input_detectors);
        sort_detectors(&mut input_detectors, |d| (d.order(), d.name().to_string()));

        let mut output_detectors: Vec<Arc<dyn OutputDetector>> = Vec::new();
        if toggles.pii {
            output_detectors.push(Arc::new(PiiLeakageDetector::new(engine.clone(), languages)));
        }
        if toggles.refusal {
            output_detectors.push(Arc::new(RefusalDetector::new(engine.clone())));
        }
        if toggles.toxicity {
            if let Some(classifier) = &self.toxicity_classifier {
                output_detectors.push(Arc::new(
                    ToxicityDetector::new(classifier.clone(), self.tokenizer.clone())
                        .with_thresholds(
                            crate::detector::injection_classifier::DEFAULT_BLOCK_THRESHOLD,
                            config.escalation_threshold,
                        ),
                ));
            }
        }
        if toggles.groundedness {
            if let Some(judge) = &judge {
                output_detectors.push(Arc::new(GroundednessDetector::new(judge.clone())));
            }
        }
        if toggles.llm_judge {
            if let Some(judge) = &judge {
                output_detectors.push(Arc::new(LlmJudgeDetector::new(judge.clone())));
            }
        }
        output_detectors.extend(self.extra_output_detectors);
        sort_detectors(&mut output_detectors, |d| (d.order(), d.name().to_string()));

        let mut streaming_detectors: Vec<Arc<dyn StreamingDetector>> = Vec::new();
        if toggles.pii {
            streaming_detectors.push(Arc::new(StreamingPiiDetector::new(
                engine,
                languages,
                self.streaming_pii_mode,
            )));
        }
        streaming_detectors.extend(self.extra_streaming_detectors);

        Ok(GuardPipeline {
            normalizer: TextNormalizer::new(config.normalizer.clone()),
            registry,
            cache,
            judge,
            input_detectors,
            output_detectors,
            streaming_detectors,
            hooks: self.hooks,
            stats: self
                .stats
                .unwrap_or_else(|| Arc::new(InMemoryStatsCollector::new())),
            config,
        })
    }
}

fn seed_registry(registry: &Arc<PatternRegistry>, config: &GuardConfig) {
    let toggles = &config.detectors;
    if toggles.prompt_injection {
        registry.register_bank(banks::CAT_PROMPT_INJECTION, banks::prompt_injection_bank());
    }
    if toggles.jailbreak {
        registry.register_bank(banks::CAT_JAILBREAK, banks::jailbreak_bank());
    }
    if toggles.encoding {
        registry.register_bank(banks::CAT_ENCODING, banks::encoding_bank());
    }
    if toggles.pii {
        registry.register_bank(banks::CAT_PII_CORE, banks::pii_core_bank());
        for lang in &config.supported_languages {
            match lang.as_str() {
                "en-US" | "en" => {
                    registry.register_bank(banks::CAT_PII_EN_US, banks::pii_en_us_bank())
                }
                "ko-KR" | "ko" => {
                    registry.register_bank(banks::CAT_PII_KO_KR, banks::pii_ko_kr_bank())
                }
                "ja-JP" | "ja" => {
                    registry.register_bank(banks::CAT_PII_JA_JP, banks::pii_ja_jp_bank())
                }
                other => warn!(language = other, "no PII bank for language"),
            }
        }
    }
    if toggles.refusal {
        registry.register_bank(banks::CAT_REFUSAL, banks::refusal_bank());
    }
    if toggles.rag_documents {
        registry.register_bank(banks::CAT_RAG_INJECTION, banks::rag_injection_bank());
    }
}

fn sort_detectors<T: ?Sized, K: Ord>(detectors: &mut [Arc<T>], key: impl Fn(&Arc<T>) -> K) {
    detectors.sort_by_key(key);
}
