use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use jarvis_ocr_service::models::envelope::{
    build_completion, parse_request, ErrorCode, ErrorInfo, ImageResult, JobEnvelope, JobStatus,
    ResultMeta,
};
use jarvis_ocr_service::models::tier::Tier;
use jarvis_ocr_service::services::queue::JobQueue;
use jarvis_ocr_service::services::state_store::{PendingValidation, StateStore};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

fn request(image_count: usize) -> JobEnvelope {
    let refs: Vec<_> = (0..image_count)
        .map(|i| json!({"kind": "local_path", "value": format!("img-{i}.png"), "index": i}))
        .collect();
    parse_request(&json!({
        "schema_version": 1,
        "job_id": format!("job-{}", Uuid::new_v4()),
        "workflow_id": "wf-test",
        "job_type": "ocr.extract_text.requested",
        "source": "recipe-ingester",
        "target": "jarvis-ocr-service",
        "created_at": "2026-08-02T10:00:00Z",
        "attempt": 1,
        "reply_to": "recipe.ocr.replies",
        "payload": {"image_refs": refs},
        "trace": {"request_id": "req-test", "parent_job_id": null}
    }))
    .expect("valid request")
}

fn result(index: usize, is_valid: bool) -> ImageResult {
    ImageResult {
        index,
        ocr_text: if is_valid { "text".into() } else { String::new() },
        truncated: false,
        meta: ResultMeta {
            language: "en".to_string(),
            confidence: if is_valid { 0.9 } else { 0.0 },
            text_len: if is_valid { 4 } else { 0 },
            is_valid,
            tier: Some(Tier::Tesseract),
            validation_reason: None,
        },
        error: if is_valid {
            None
        } else {
            Some(ErrorInfo::new(ErrorCode::OcrNoValidOutput, "rejected"))
        },
    }
}

fn pending_state(job: &JobEnvelope) -> PendingValidation {
    PendingValidation {
        correlation_id: format!("val-{}", Uuid::new_v4()),
        job: job.clone(),
        image_index: 0,
        tier: Tier::Tesseract,
        remaining_tiers: vec![Tier::LlmCloud],
        candidate_text: "Hello".to_string(),
        text_len: 5,
        truncated: false,
        native_confidence: None,
        results: Vec::new(),
        attempt: 1,
        created_at: Utc::now(),
    }
}

/// Every emitted completion aligns results with the request: exactly one
/// entry per image, ascending by index.
#[test]
fn completion_results_align_with_request_indices() {
    let job = request(4);
    let completion = build_completion(
        &job,
        vec![result(3, false), result(1, true), result(0, true), result(2, false)],
        None,
    );

    assert_eq!(completion.payload.results.len(), job.payload.image_count());
    let indices: Vec<_> = completion.payload.results.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
}

/// Partial success is success: one valid image outweighs any number of
/// per-image failures, and the per-image errors stay in their slots.
#[test]
fn partial_success_reports_success_with_per_image_errors() {
    let job = request(2);
    let mut pdf_failure = result(0, false);
    pdf_failure.error = Some(ErrorInfo::new(ErrorCode::UnsupportedMedia, "PDF"));

    let completion = build_completion(&job, vec![pdf_failure, result(1, true)], None);

    assert_eq!(completion.payload.status, JobStatus::Success);
    assert!(completion.payload.error.is_none());
    let first = &completion.payload.results[0];
    assert_eq!(first.error.as_ref().expect("per-image error").code, ErrorCode::UnsupportedMedia);
    assert!(completion.payload.results[1].meta.is_valid);
}

/// All images failing yields a failed completion with the job-level
/// `ocr_all_images_failed` error on top of the per-image errors.
#[test]
fn all_images_failed_reports_job_level_error() {
    let job = request(2);
    let completion = build_completion(&job, vec![result(0, false), result(1, false)], None);

    assert_eq!(completion.payload.status, JobStatus::Failed);
    let error = completion.payload.error.expect("job-level error");
    assert_eq!(error.code, ErrorCode::OcrAllImagesFailed);
}

/// Request identity fields round-trip into the completion.
#[test]
fn completion_round_trips_trace_fields() {
    let job = request(1);
    let completion = build_completion(&job, vec![result(0, true)], None);

    assert_eq!(completion.workflow_id, job.workflow_id);
    assert_eq!(completion.trace.request_id.as_deref(), Some("req-test"));
    assert_eq!(completion.trace.parent_job_id.as_deref(), Some(job.job_id.as_str()));
}

/// Pending state survives a JSON round trip intact, including the tier
/// cursor a resuming worker needs.
#[test]
fn pending_state_serializes_round_trip() {
    let job = request(1);
    let state = pending_state(&job);

    let raw = serde_json::to_string(&state).expect("serialize");
    let back: PendingValidation = serde_json::from_str(&raw).expect("deserialize");

    assert_eq!(back.correlation_id, state.correlation_id);
    assert_eq!(back.tier, Tier::Tesseract);
    assert_eq!(back.remaining_tiers, vec![Tier::LlmCloud]);
    assert_eq!(back.candidate_text, "Hello");
    assert_eq!(back.job.job_id, job.job_id);
}

/// Note: requires a running Redis instance (REDIS_URL).
/// Run with: cargo test --test integration_test -- --ignored
#[tokio::test]
#[ignore]
async fn queue_round_trip_is_fifo() {
    let queue = JobQueue::new(&redis_url()).expect("queue");
    let name = format!("test.ocr.jobs.{}", Uuid::new_v4());

    let first = request(1);
    let second = request(1);
    queue.push(&name, &first).await.expect("push first");
    queue.push(&name, &second).await.expect("push second");

    assert_eq!(queue.depth(&name).await.expect("depth"), 2);

    let popped = queue
        .pop(&name, Duration::from_secs(1))
        .await
        .expect("pop")
        .expect("message waiting");
    let envelope: JobEnvelope = serde_json::from_str(&popped).expect("parse");
    assert_eq!(envelope.job_id, first.job_id);

    let popped = queue
        .pop(&name, Duration::from_secs(1))
        .await
        .expect("pop")
        .expect("message waiting");
    let envelope: JobEnvelope = serde_json::from_str(&popped).expect("parse");
    assert_eq!(envelope.job_id, second.job_id);

    let drained = queue.pop(&name, Duration::from_secs(1)).await.expect("pop");
    assert!(drained.is_none());
}

/// The load-then-delete claim hands the state to exactly one caller; the
/// duplicate-callback law rests on the second take finding nothing.
#[tokio::test]
#[ignore]
async fn state_take_is_single_writer() {
    let store = StateStore::new(&redis_url(), Duration::from_secs(60)).expect("store");
    let job = request(1);
    let state = pending_state(&job);

    store.save(&state).await.expect("save");

    let claimed = store.take(&state.correlation_id).await.expect("take");
    assert!(claimed.is_some());

    let duplicate = store.take(&state.correlation_id).await.expect("take again");
    assert!(duplicate.is_none());
}

/// Deadline entries are claimed at most once, so concurrent sweepers cannot
/// both time out the same job.
#[tokio::test]
#[ignore]
async fn deadline_sweep_claims_each_id_once() {
    let store = StateStore::new(&redis_url(), Duration::from_secs(1)).expect("store");
    let job = request(1);
    let state = pending_state(&job);

    store.save(&state).await.expect("save");

    let horizon = Utc::now() + chrono::Duration::seconds(5);
    let due = store.due_deadlines(horizon).await.expect("sweep");
    assert!(due.contains(&state.correlation_id));

    let again = store.due_deadlines(horizon).await.expect("sweep again");
    assert!(!again.contains(&state.correlation_id));

    // the state blob itself is still claimable by the sweeper
    let pending = store.take(&state.correlation_id).await.expect("take");
    assert!(pending.is_some());
}
