//! Streaming output validation.
//!
//! A lazy sequence transformer: `(ctx, chunk stream) -> result stream`.
//! No callback chaining; cancellation is threaded through the context and
//! detectors that error are treated as Pass (fail-open).

pub mod buffer;

use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use crate::context::CheckContext;
use crate::detector::{StreamVerdict, StreamingDetector};
use crate::verdict::{DetectorVerdict, Severity};
use buffer::ChunkBuffer;

pub type ChunkStream = Pin<Box<dyn Stream<Item = String> + Send>>;
pub type GuardedStream = Pin<Box<dyn Stream<Item = ChunkResult> + Send>>;

/// Per-emitted-chunk result.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkResult {
    /// The chunk as received from the model.
    pub original: String,
    /// What the application may emit to the user: the chunk itself, a
    /// replacement, or nothing.
    pub output: Option<String>,
    /// Final-pass or sentence-level verdict, when one was produced.
    pub verdict: Option<DetectorVerdict>,
    pub terminated: bool,
    pub suppressed: bool,
    pub is_final: bool,
}

#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Validate complete sentences when the tail looks sensitive.
    pub sentence_validation: bool,
    /// Force sentence extraction after this many boundary-free characters.
    pub max_unprocessed: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            sentence_validation: true,
            max_unprocessed: buffer::DEFAULT_MAX_UNPROCESSED,
        }
    }
}

struct StreamState {
    ctx: Arc<CheckContext>,
    detectors: Vec<Arc<dyn StreamingDetector>>,
    options: StreamOptions,
    upstream: ChunkStream,
    buffer: ChunkBuffer,
    finished: bool,
}

/// Wrap a chunk stream in streaming validation.
///
/// The output stream ends after a `terminated` item, after the final flush
/// item, or silently on cancellation.
pub fn guard_stream(
    ctx: Arc<CheckContext>,
    detectors: Vec<Arc<dyn StreamingDetector>>,
    options: StreamOptions,
    upstream: ChunkStream,
) -> GuardedStream {
    let buffer = ChunkBuffer::new(options.max_unprocessed);
    let state = StreamState {
        ctx,
        detectors,
        options,
        upstream,
        buffer,
        finished: false,
    };

    Box::pin(futures::stream::unfold(state, |mut st| async move {
        if st.finished {
            return None;
        }

        match st.upstream.next().await {
            Some(chunk) => {
                if st.ctx.cancel.is_cancelled() {
                    debug!(request_id = %st.ctx.request_id, "stream cancelled");
                    st.finished = true;
                    return None;
                }
                let item = process_chunk(&mut st, chunk).await;
                Some((item, st))
            }
            None => {
                st.finished = true;
                let item = final_flush(&mut st).await;
                Some((item, st))
            }
        }
    }))
}

async fn process_chunk(st: &mut StreamState, chunk: String) -> ChunkResult {
    st.buffer.append(&chunk);
    let accumulated = st.buffer.accumulated().to_string();

    let mut suppression: Option<Option<String>> = None;
    for detector in enabled(&st.detectors) {
        match detector
            .validate_chunk(&st.ctx, &chunk, &accumulated)
            .await
        {
            Ok(StreamVerdict::Pass) => {}
            Ok(StreamVerdict::Suppress(replacement)) => {
                if suppression.is_none() {
                    suppression = Some(replacement);
                }
            }
            Ok(StreamVerdict::Terminate(reason)) => {
                warn!(
                    request_id = %st.ctx.request_id,
                    detector = detector.name(),
                    reason,
                    "stream terminated"
                );
                st.finished = true;
                return ChunkResult {
                    original: chunk,
                    output: None,
                    verdict: None,
                    terminated: true,
                    suppressed: false,
                    is_final: true,
                };
            }
            Err(e) => {
                warn!(
                    request_id = %st.ctx.request_id,
                    detector = detector.name(),
                    error = %e,
                    "streaming detector failed, passing chunk"
                );
            }
        }
    }

    // Sentence-level validation when the tail looks like PII in progress.
    if st.options.sentence_validation && st.buffer.may_contain_incomplete_sensitive() {
        while let Some(sentence) = st.buffer.try_extract_sentence() {
            for detector in enabled(&st.detectors) {
                match detector.validate_final(&st.ctx, &sentence).await {
                    Ok(v) if !v.passed && v.severity >= Severity::High => {
                        warn!(
                            request_id = %st.ctx.request_id,
                            detector = detector.name(),
                            "sentence validation terminated stream"
                        );
                        st.finished = true;
                        return ChunkResult {
                            original: chunk,
                            output: None,
                            verdict: Some(v),
                            terminated: true,
                            suppressed: false,
                            is_final: true,
                        };
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(detector = detector.name(), error = %e, "sentence validation failed, passing");
                    }
                }
            }
        }
    }

    let suppressed = suppression.is_some();
    let output = match suppression {
        Some(replacement) => replacement,
        None => Some(chunk.clone()),
    };
    ChunkResult {
        original: chunk,
        output,
        verdict: None,
        terminated: false,
        suppressed,
        is_final: false,
    }
}

/// One last validation over the complete accumulated output.
async fn final_flush(st: &mut StreamState) -> ChunkResult {
    let full = st.buffer.accumulated().to_string();
    let mut worst: Option<DetectorVerdict> = None;

    for detector in enabled(&st.detectors) {
        match detector.validate_final(&st.ctx, &full).await {
            Ok(v) => {
                let is_worse = worst
                    .as_ref()
                    .map(|w| (!v.passed, v.severity, v.score) > (!w.passed, w.severity, w.score))
                    .unwrap_or(true);
                if is_worse {
                    worst = Some(v);
                }
            }
            Err(e) => {
                warn!(detector = detector.name(), error = %e, "final validation failed, passing");
            }
        }
    }

    let terminated = worst.as_ref().map(|v| !v.passed).unwrap_or(false);
    ChunkResult {
        original: String::new(),
        output: None,
        verdict: worst,
        terminated,
        suppressed: false,
        is_final: true,
    }
}

fn enabled(detectors: &[Arc<dyn StreamingDetector>]) -> impl Iterator<Item = &Arc<dyn StreamingDetector>> {
    detectors.iter().filter(|d| d.enabled())
}
