//! Streaming orchestrator behavior through the full pipeline: suppression,
//! termination, final-pass validation and cancellation.

mod common;

use std::sync::Arc;

use futures::StreamExt;
use promptgate_core::detector::pii::PiiStreamMode;
use promptgate_core::stream::ChunkStream;
use promptgate_core::{CancelToken, CheckContext, ChunkResult, GuardConfig, GuardPipeline};

fn chunks(parts: &[&str]) -> ChunkStream {
    let owned: Vec<String> = parts.iter().map(|s| s.to_string()).collect();
    Box::pin(futures::stream::iter(owned))
}

async fn run_stream(pipeline: &GuardPipeline, parts: &[&str]) -> Vec<ChunkResult> {
    let ctx = Arc::new(CheckContext::new("streaming request"));
    pipeline.check_stream(ctx, chunks(parts)).collect().await
}

#[tokio::test]
async fn clean_stream_is_emitted_verbatim() {
    let pipeline = GuardPipeline::from_config(GuardConfig::standard()).unwrap();
    let results = run_stream(&pipeline, &["The capital ", "of France ", "is Paris."]).await;

    let emitted: String = results.iter().filter_map(|r| r.output.clone()).collect();
    assert_eq!(emitted, "The capital of France is Paris.");

    let last = results.last().unwrap();
    assert!(last.is_final);
    assert!(!last.terminated);
}

#[tokio::test]
async fn email_across_chunks_is_suppressed() {
    let pipeline = GuardPipeline::builder(GuardConfig::standard())
        .streaming_pii_mode(PiiStreamMode::Suppress)
        .build()
        .unwrap();

    let results = run_stream(&pipeline, &["Contact me ", "at user@", "example.com."]).await;

    // First chunk flows, the dangling local-part is held back, and the chunk
    // completing the address is redacted.
    assert_eq!(results[0].output.as_deref(), Some("Contact me "));
    assert_eq!(results[1].output.as_deref(), Some("[REDACTED]"));
    assert!(results[1].suppressed);
    assert!(results[2].suppressed || results[2].terminated);

    let emitted: String = results.iter().filter_map(|r| r.output.clone()).collect();
    assert!(!emitted.contains("user@example.com"));
    assert!(!emitted.contains("example.com"));
}

#[tokio::test]
async fn terminate_mode_ends_stream_on_pii() {
    let pipeline = GuardPipeline::builder(GuardConfig::standard())
        .streaming_pii_mode(PiiStreamMode::Terminate)
        .build()
        .unwrap();

    let results = run_stream(
        &pipeline,
        &["here it is: bob@example.com", " and more text", " that never arrives"],
    )
    .await;

    let terminated_at = results.iter().position(|r| r.terminated).unwrap();
    assert_eq!(terminated_at, results.len() - 1, "stream ends at termination");
    let emitted: String = results.iter().filter_map(|r| r.output.clone()).collect();
    assert!(!emitted.contains("bob@example.com"));
    assert!(!emitted.contains("more text"));
}

#[tokio::test]
async fn final_pass_catches_what_chunks_missed() {
    // Credit card split so no single chunk completes it until the last one;
    // the final flush must still fail the accumulated output.
    let pipeline = GuardPipeline::builder(GuardConfig::standard())
        .streaming_pii_mode(PiiStreamMode::Suppress)
        .build()
        .unwrap();

    let results = run_stream(&pipeline, &["card: 41111111", "11111111"]).await;
    let last = results.last().unwrap();
    assert!(last.is_final);
    assert!(last.terminated, "final validation fails on the full card");
    let verdict = last.verdict.as_ref().unwrap();
    assert!(!verdict.passed);
}

#[tokio::test]
async fn cancelled_stream_stops_emitting() {
    let pipeline = GuardPipeline::from_config(GuardConfig::standard()).unwrap();
    let cancel = CancelToken::new();
    let ctx = Arc::new(CheckContext::new("q").with_cancel(cancel.clone()));
    cancel.cancel();

    let results: Vec<ChunkResult> = pipeline
        .check_stream(ctx, chunks(&["never ", "emitted"]))
        .collect()
        .await;
    assert!(results.is_empty());
}
