//! Application hook surface.
//!
//! Every hook is an optional function value; absence equals no-op. Hooks
//! observe or override, they never mutate in place.

use std::sync::Arc;

use crate::context::CheckContext;
use crate::detector::DetectorError;
use crate::verdict::GuardResult;

/// Outcome of a decision-shaping hook.
pub enum HookOutcome {
    /// Keep the pipeline's own result (or honor the fail-mode policy for
    /// error hooks).
    Continue,
    /// Replace the result wholesale.
    Override(GuardResult),
}

pub type BeforeCheckHook = Arc<dyn Fn(&CheckContext) -> bool + Send + Sync>;
pub type AfterCheckHook = Arc<dyn Fn(&CheckContext, &GuardResult) + Send + Sync>;
pub type DecisionHook = Arc<dyn Fn(&CheckContext, &GuardResult) + Send + Sync>;
pub type CustomDecisionHook = Arc<dyn Fn(&CheckContext, &GuardResult) -> HookOutcome + Send + Sync>;
pub type GuardErrorHook =
    Arc<dyn Fn(&CheckContext, &str, &DetectorError) -> HookOutcome + Send + Sync>;
pub type BeforeEscalationHook = Arc<dyn Fn(&CheckContext, &GuardResult) -> bool + Send + Sync>;
pub type EscalationTimeoutHook =
    Arc<dyn Fn(&CheckContext, &GuardResult) -> GuardResult + Send + Sync>;

#[derive(Default, Clone)]
pub struct GuardHooks {
    /// Returning `false` short-circuits the check with a Pass.
    pub on_before_check: Option<BeforeCheckHook>,
    pub on_after_check: Option<AfterCheckHook>,
    pub on_blocked: Option<DecisionHook>,
    pub on_flagged: Option<DecisionHook>,
    pub on_passed: Option<DecisionHook>,
    /// Last word on the decision before the decision-specific hooks run.
    pub on_custom_decision: Option<CustomDecisionHook>,
    /// Consulted when a detector errors; `Continue` honors the fail-mode.
    pub on_guard_error: Option<GuardErrorHook>,
    /// Returning `false` skips the remote-judge escalation.
    pub on_before_escalation: Option<BeforeEscalationHook>,
    /// Produces the fallback result when escalation times out.
    pub on_escalation_timeout: Option<EscalationTimeoutHook>,
}

impl std::fmt::Debug for GuardHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardHooks")
            .field("on_before_check", &self.on_before_check.is_some())
            .field("on_after_check", &self.on_after_check.is_some())
            .field("on_blocked", &self.on_blocked.is_some())
            .field("on_flagged", &self.on_flagged.is_some())
            .field("on_passed", &self.on_passed.is_some())
            .field("on_custom_decision", &self.on_custom_decision.is_some())
            .field("on_guard_error", &self.on_guard_error.is_some())
            .field("on_before_escalation", &self.on_before_escalation.is_some())
            .field(
                "on_escalation_timeout",
                &self.on_escalation_timeout.is_some(),
            )
            .finish()
    }
}
