//! Stats collection: per-check and per-detector counters with a
//! point-in-time snapshot, mirrored onto the `metrics` facade for whatever
//! exporter the application installs.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use metrics::{counter, histogram};
use serde::Serialize;

use crate::verdict::{Decision, DetectorLayer, GuardResult};

pub trait StatsCollector: Send + Sync {
    fn record_check(&self, result: &GuardResult, is_input: bool);
    fn record_detector(&self, name: &str, layer: DetectorLayer, latency_ms: u64, triggered: bool);
    fn record_error(&self, name: &str, layer: DetectorLayer);
    fn snapshot(&self) -> StatsSnapshot;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectorStats {
    pub invocations: u64,
    pub triggers: u64,
    pub errors: u64,
    pub total_latency_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub total_checks: u64,
    pub input_checks: u64,
    pub output_checks: u64,
    pub passed: u64,
    pub flagged: u64,
    pub escalated: u64,
    pub blocked: u64,
    pub detectors: std::collections::HashMap<String, DetectorStats>,
}

/// Concurrent in-memory collector; the default when the application
/// supplies none.
#[derive(Default)]
pub struct InMemoryStatsCollector {
    total_checks: AtomicU64,
    input_checks: AtomicU64,
    output_checks: AtomicU64,
    passed: AtomicU64,
    flagged: AtomicU64,
    escalated: AtomicU64,
    blocked: AtomicU64,
    detectors: DashMap<String, DetectorStats>,
}

impl InMemoryStatsCollector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatsCollector for InMemoryStatsCollector {
    fn record_check(&self, result: &GuardResult, is_input: bool) {
        self.total_checks.fetch_add(1, Ordering::Relaxed);
        if is_input {
            self.input_checks.fetch_add(1, Ordering::Relaxed);
        } else {
            self.output_checks.fetch_add(1, Ordering::Relaxed);
        }
        let bucket = match result.decision {
            Decision::Pass => &self.passed,
            Decision::Flag => &self.flagged,
            Decision::Escalate => &self.escalated,
            Decision::Block => &self.blocked,
        };
        bucket.fetch_add(1, Ordering::Relaxed);

        counter!(
            "promptgate_checks_total",
            1,
            "decision" => result.decision.to_string(),
            "side" => if is_input { "input" } else { "output" }
        );
        histogram!("promptgate_check_latency_ms", result.latency_ms as f64);
    }

    fn record_detector(&self, name: &str, layer: DetectorLayer, latency_ms: u64, triggered: bool) {
        let mut entry = self.detectors.entry(name.to_string()).or_default();
        entry.invocations += 1;
        entry.total_latency_ms += latency_ms;
        if triggered {
            entry.triggers += 1;
        }
        drop(entry);

        if triggered {
            counter!(
                "promptgate_detector_triggers_total",
                1,
                "detector" => name.to_string(),
                "layer" => layer.to_string()
            );
        }
        histogram!(
            "promptgate_detector_latency_ms",
            latency_ms as f64,
            "detector" => name.to_string()
        );
    }

    fn record_error(&self, name: &str, layer: DetectorLayer) {
        self.detectors.entry(name.to_string()).or_default().errors += 1;
        counter!(
            "promptgate_detector_errors_total",
            1,
            "detector" => name.to_string(),
            "layer" => layer.to_string()
        );
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_checks: self.total_checks.load(Ordering::Relaxed),
            input_checks: self.input_checks.load(Ordering::Relaxed),
            output_checks: self.output_checks.load(Ordering::Relaxed),
            passed: self.passed.load(Ordering::Relaxed),
            flagged: self.flagged.load(Ordering::Relaxed),
            escalated: self.escalated.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            detectors: self
                .detectors
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        }
    }
}
