//! Remote LLM-as-judge (L3).
//!
//! Formats a judgment request to a completion service, parses the structured
//! verdict, and consults the semantic cache to elide redundant calls.
//! Every failure path is fail-open: the caller always gets a Judgment, never
//! an error.

pub mod http;
pub mod prompts;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::SemanticCache;
use crate::context::CheckContext;
use crate::verdict::Severity;

/// Which side of the conversation a judgment covers. Also namespaces cache
/// keys so input and output judgments of identical text never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GuardType {
    Input,
    Output,
}

impl GuardType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

/// Structured verdict returned by the judge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Judgment {
    pub passed: bool,
    /// Threat confidence in [0, 1].
    pub score: f64,
    pub severity: Severity,
    pub reasoning: String,
    pub categories: Vec<String>,
    pub latency_ms: u64,
    pub model: String,
    pub from_cache: bool,
}

impl Judgment {
    /// Fail-open pass used for transport errors, timeouts and parse failures.
    pub fn pass_with_reason(reason: &str, model: &str, latency_ms: u64) -> Self {
        Self {
            passed: true,
            score: 0.0,
            severity: Severity::None,
            reasoning: reason.to_string(),
            categories: Vec::new(),
            latency_ms,
            model: model.to_string(),
            from_cache: false,
        }
    }
}

/// Groundedness judgment: a [`Judgment`] plus hallucination detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundednessJudgment {
    pub judgment: Judgment,
    pub hallucination_type: Option<String>,
    pub hallucinated_claims: Vec<String>,
}

/// Request sent to a completion service.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Hint that the response must be a JSON object.
    pub json_response: bool,
}

/// Response from a completion service. Transport-level failure is expressed
/// through `success`/`error`, never a Rust error, so judge policy stays in
/// one place.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionResponse {
    pub success: bool,
    pub content: String,
    pub error: Option<String>,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub latency_ms: u64,
}

impl CompletionResponse {
    pub fn failure(error: impl Into<String>, model: &str, latency_ms: u64) -> Self {
        Self {
            success: false,
            content: String::new(),
            error: Some(error.into()),
            model: model.to_string(),
            prompt_tokens: 0,
            completion_tokens: 0,
            latency_ms,
        }
    }
}

/// LLM completion backend abstraction. The core never speaks a provider
/// protocol directly; see [`http::ChatCompletionClient`] for the default
/// OpenAI-style adapter.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> CompletionResponse;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Score at or above which the judge verdict blocks.
    pub block_threshold: f64,
    /// Score at or above which an unsafe default is assumed when the judge
    /// omits `is_safe`.
    pub flag_threshold: f64,
    pub timeout_ms: u64,
    pub max_retries: u32,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 512,
            temperature: 0.0,
            block_threshold: 0.9,
            flag_threshold: 0.7,
            timeout_ms: 5_000,
            max_retries: 1,
        }
    }
}

/// The remote judge: cache consultation, prompt construction, verdict
/// parsing.
pub struct RemoteJudge {
    service: Arc<dyn CompletionService>,
    cache: Arc<SemanticCache>,
    config: JudgeConfig,
}

impl RemoteJudge {
    pub fn new(
        service: Arc<dyn CompletionService>,
        cache: Arc<SemanticCache>,
        config: JudgeConfig,
    ) -> Self {
        Self {
            service,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &JudgeConfig {
        &self.config
    }

    /// Judge a user input. `l2_context` carries the names of L2 detectors
    /// that triggered, when escalation came from them.
    pub async fn check_input(&self, ctx: &CheckContext, l2_context: Option<&str>) -> Judgment {
        let text = ctx.effective_input();
        if let Some(cached) = self.cache.try_get(text, GuardType::Input) {
            debug!(request_id = %ctx.request_id, "judge cache hit");
            return cached;
        }

        let judgment = self
            .submit(
                prompts::INPUT_GUARD_SYSTEM_PROMPT,
                prompts::input_user_prompt(text, l2_context),
            )
            .await;

        if is_cacheable(&judgment) {
            self.cache.set(text, GuardType::Input, judgment.clone());
        }
        judgment
    }

    /// Judge a model output in the context of its input.
    pub async fn check_output(
        &self,
        ctx: &CheckContext,
        output: &str,
        l2_context: Option<&str>,
    ) -> Judgment {
        let cache_key = format!("{}\u{241E}{}", ctx.effective_input(), output);
        if let Some(cached) = self.cache.try_get(&cache_key, GuardType::Output) {
            debug!(request_id = %ctx.request_id, "judge cache hit");
            return cached;
        }

        let judgment = self
            .submit(
                prompts::OUTPUT_GUARD_SYSTEM_PROMPT,
                prompts::output_user_prompt(ctx.effective_input(), output, l2_context),
            )
            .await;

        if is_cacheable(&judgment) {
            self.cache.set(&cache_key, GuardType::Output, judgment.clone());
        }
        judgment
    }

    /// Groundedness check of an output against a grounding context.
    pub async fn check_groundedness(
        &self,
        ctx: &CheckContext,
        grounding: &str,
        output: &str,
    ) -> GroundednessJudgment {
        let cache_key = format!("grounded\u{241E}{grounding}\u{241E}{output}");
        if let Some(cached) = self.cache.try_get(&cache_key, GuardType::Output) {
            debug!(request_id = %ctx.request_id, "groundedness cache hit");
            return GroundednessJudgment {
                judgment: cached,
                hallucination_type: None,
                hallucinated_claims: Vec::new(),
            };
        }

        let started = Instant::now();
        let response = self
            .complete_with_retries(CompletionRequest {
                system_prompt: prompts::GROUNDEDNESS_SYSTEM_PROMPT.to_string(),
                user_prompt: prompts::groundedness_user_prompt(grounding, output),
                model: self.config.model.clone(),
                max_tokens: self.config.max_tokens,
                temperature: 0.0,
                json_response: true,
            })
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let result = match response {
            Some(response) if response.success => {
                self.parse_groundedness(&response.content, latency_ms)
            }
            _ => GroundednessJudgment {
                judgment: Judgment::pass_with_reason("unavailable", &self.config.model, latency_ms),
                hallucination_type: None,
                hallucinated_claims: Vec::new(),
            },
        };

        if is_cacheable(&result.judgment) {
            self.cache
                .set(&cache_key, GuardType::Output, result.judgment.clone());
        }
        result
    }

    async fn submit(&self, system_prompt: &str, user_prompt: String) -> Judgment {
        let started = Instant::now();
        let response = self
            .complete_with_retries(CompletionRequest {
                system_prompt: system_prompt.to_string(),
                user_prompt,
                model: self.config.model.clone(),
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
                json_response: true,
            })
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match response {
            Some(response) if response.success => {
                self.parse_judgment(&response.content, &response.model, latency_ms)
            }
            Some(response) => {
                warn!(
                    error = response.error.as_deref().unwrap_or("unknown"),
                    "judge completion failed"
                );
                Judgment::pass_with_reason("unavailable", &self.config.model, latency_ms)
            }
            None => {
                warn!(timeout_ms = self.config.timeout_ms, "judge timed out");
                Judgment::pass_with_reason("unavailable", &self.config.model, latency_ms)
            }
        }
    }

    /// Run the completion with the configured timeout, retrying transport
    /// failures up to `max_retries` times. `None` means timeout.
    async fn complete_with_retries(&self, request: CompletionRequest) -> Option<CompletionResponse> {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let mut last = None;
        for attempt in 0..=self.config.max_retries {
            match tokio::time::timeout(timeout, self.service.complete(request.clone())).await {
                Ok(response) => {
                    if response.success {
                        return Some(response);
                    }
                    debug!(attempt, "judge completion attempt failed");
                    last = Some(response);
                }
                Err(_) => return last,
            }
        }
        last
    }

    fn parse_judgment(&self, content: &str, model: &str, latency_ms: u64) -> Judgment {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(content) else {
            return Judgment::pass_with_reason("parse error", model, latency_ms);
        };
        let Some(obj) = value.as_object() else {
            return Judgment::pass_with_reason("parse error", model, latency_ms);
        };

        let score = obj
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);

        let passed = match obj.get("is_safe").and_then(|v| v.as_bool()) {
            Some(is_safe) => is_safe,
            // Absent is_safe: assume unsafe only past the flag threshold.
            None => score < self.config.flag_threshold,
        };

        let severity = match obj.get("severity").and_then(|v| v.as_str()) {
            Some(s) => Severity::from_str_lenient(s),
            None if passed => Severity::None,
            None => severity_from_score(score),
        };

        let categories = obj
            .get("categories")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|c| c.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let reasoning = obj
            .get("reasoning")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        Judgment {
            passed,
            score,
            severity,
            reasoning,
            categories,
            latency_ms,
            model: model.to_string(),
            from_cache: false,
        }
    }

    fn parse_groundedness(&self, content: &str, latency_ms: u64) -> GroundednessJudgment {
        let model = &self.config.model;
        let Ok(value) = serde_json::from_str::<serde_json::Value>(content) else {
            return GroundednessJudgment {
                judgment: Judgment::pass_with_reason("parse error", model, latency_ms),
                hallucination_type: None,
                hallucinated_claims: Vec::new(),
            };
        };

        let score = value
            .get("hallucination_score")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        let is_grounded = value
            .get("is_grounded")
            .and_then(|v| v.as_bool())
            .unwrap_or(score < self.config.flag_threshold);

        let hallucinated_claims = value
            .get("hallucinated_claims")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|c| c.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        GroundednessJudgment {
            judgment: Judgment {
                passed: is_grounded,
                score,
                severity: severity_from_score(score),
                reasoning: value
                    .get("reasoning")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                categories: vec!["hallucination".to_string()],
                latency_ms,
                model: model.clone(),
                from_cache: false,
            },
            hallucination_type: value
                .get("type")
                .and_then(|v| v.as_str())
                .map(String::from),
            hallucinated_claims,
        }
    }
}

/// Degraded judgments (transport failure, parse failure) must not poison
/// the cache.
fn is_cacheable(judgment: &Judgment) -> bool {
    judgment.reasoning != "unavailable" && judgment.reasoning != "parse error"
}

/// Severity bands used when the judge omits an explicit severity.
pub fn severity_from_score(score: f64) -> Severity {
    if score >= 0.9 {
        Severity::Critical
    } else if score >= 0.7 {
        Severity::High
    } else if score >= 0.5 {
        Severity::Medium
    } else {
        Severity::Low
    }
}
