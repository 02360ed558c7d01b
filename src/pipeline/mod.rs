//! The per-job cascade state machine.
//!
//! A job walks its images sequentially; each image walks the active tier
//! list until the validator accepts a candidate. Execution suspends after
//! every validator enqueue: the cursor is persisted in the state store and
//! the worker slot is released. The callback endpoint (or the deadline
//! sweeper) claims the cursor later and re-enters [`resume`] on whichever
//! worker received it.

use std::collections::HashSet;

use chrono::Utc;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::envelope::{
    build_completion, failure_completion_for_raw, parse_request, ErrorCode, ErrorInfo, ImageResult,
    JobEnvelope, JobStatus, ResultMeta,
};
use crate::models::tier::Tier;
use crate::providers::Candidate;
use crate::services::queue::{QueueError, INPUT_QUEUE};
use crate::services::resolver::ResolveError;
use crate::services::state_store::{PendingValidation, StateStoreError};
use crate::services::text;
use crate::services::validator::{ValidatorError, Verdict};

/// Failures that abort the whole job and feed the retry policy. Everything
/// here is transient infrastructure; per-image failures never take this
/// path.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("state store unavailable: {0}")]
    StateStore(#[from] StateStoreError),

    #[error("validator enqueue failed: {0}")]
    Validator(#[from] ValidatorError),

    #[error("queue unreachable: {0}")]
    Queue(#[from] QueueError),

    #[error("transient image fetch failure: {0}")]
    Transient(String),
}

/// A job-level error together with the image results that had already
/// settled when it struck, so a terminal completion can still carry one
/// entry per requested image.
#[derive(Debug)]
pub struct JobFailure {
    pub error: JobError,
    pub results: Vec<ImageResult>,
}

enum ImageOutcome {
    /// A candidate went out for validation; the job is parked in the state
    /// store until the callback arrives.
    Suspended,
    /// The image reached a final result without suspending.
    Settled(ImageResult),
}

enum CascadeOutcome {
    Suspended,
    /// Every tier in the slice failed before producing a candidate.
    Exhausted {
        last_attempted: Option<Tier>,
        last_error: Option<String>,
    },
}

/// What to do with a verdict for a suspended tier attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    NextTier,
    Exhausted,
}

/// Entry point for raw input-queue payloads.
pub async fn handle_raw_message(app: &AppState, raw: &str) {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::error!(error = %e, "Dropping unparseable queue message");
            return;
        }
    };

    let job = match parse_request(&value) {
        Ok(job) => job,
        Err(e) => {
            tracing::error!(error = %e, "Schema validation failed");
            reject_bad_request(app, &value, &e.to_string()).await;
            return;
        }
    };

    handle_job(app, job).await;
}

/// Emit a `bad_request` completion for a schema-invalid message. Fail-fast:
/// never retried, and silently dropped when no reply queue is recoverable.
async fn reject_bad_request(app: &AppState, raw: &serde_json::Value, detail: &str) {
    let error = ErrorInfo::new(ErrorCode::BadRequest, detail);
    let Some((reply_to, completion)) = failure_completion_for_raw(raw, error) else {
        tracing::warn!("Schema-invalid message has no reply_to, nothing to notify");
        return;
    };
    if let Err(e) = app.queue.push(&reply_to, &completion).await {
        tracing::error!(reply_to = %reply_to, error = %e, "Failed to emit bad_request completion");
    }
    metrics::counter!("ocr_jobs_failed").increment(1);
}

/// Drive a freshly popped job from its first image.
pub async fn handle_job(app: &AppState, job: JobEnvelope) {
    metrics::counter!("ocr_jobs_total").increment(1);
    tracing::info!(
        job_id = %job.job_id,
        workflow_id = %job.workflow_id,
        attempt = job.attempt,
        images = job.payload.image_count(),
        "Processing OCR job"
    );

    if let Err(failure) = advance_from(app, &job, 0, Vec::new()).await {
        requeue_or_fail(app, &job, &failure.error.to_string(), failure.results).await;
    }
}

/// Re-enter a suspended job with the validator's verdict. Called by the
/// callback endpoint after it has claimed the pending state.
pub async fn resume(app: &AppState, pending: PendingValidation, verdict: Verdict) {
    let decision = decide(&pending, &verdict, app.config.ocr_min_confidence);
    tracing::info!(
        job_id = %pending.job.job_id,
        image_index = pending.image_index,
        tier = %pending.tier,
        is_valid = verdict.is_valid,
        decision = ?decision,
        "Resuming after validation verdict"
    );

    let job = pending.job.clone();
    let language = job
        .payload
        .language(&app.config.ocr_language_default)
        .to_string();

    let outcome = match decision {
        Decision::Accept => {
            let result = accepted_result(&pending, &verdict, &language);
            continue_after(app, &job, pending.image_index, pending.results, result).await
        }
        Decision::Exhausted => {
            let result = rejected_result(&pending, &verdict, &language);
            continue_after(app, &job, pending.image_index, pending.results, result).await
        }
        Decision::NextTier => retry_with_remaining(app, pending, &language).await,
    };

    if let Err(failure) = outcome {
        requeue_or_fail(app, &job, &failure.error.to_string(), failure.results).await;
    }
}

fn decide(pending: &PendingValidation, verdict: &Verdict, min_confidence: Option<f64>) -> Decision {
    let confident = match min_confidence {
        Some(floor) => verdict.confidence.unwrap_or(0.0) >= floor,
        None => true,
    };

    if verdict.is_valid && confident {
        Decision::Accept
    } else if pending.remaining_tiers.is_empty() {
        Decision::Exhausted
    } else {
        Decision::NextTier
    }
}

/// Process images sequentially starting at `index`; returns after either
/// suspending on a validator enqueue or emitting the completion.
async fn advance_from(
    app: &AppState,
    job: &JobEnvelope,
    start_index: usize,
    mut results: Vec<ImageResult>,
) -> Result<(), JobFailure> {
    let image_count = job.payload.image_count();
    let language = job
        .payload
        .language(&app.config.ocr_language_default)
        .to_string();

    let mut index = start_index;
    while index < image_count {
        match attempt_image(app, job, index, &language, &results).await {
            Ok(ImageOutcome::Suspended) => return Ok(()),
            Ok(ImageOutcome::Settled(result)) => {
                results.push(result);
                index += 1;
            }
            Err(error) => return Err(JobFailure { error, results }),
        }
    }

    if let Err(error) = emit_completion(app, job, &results, None).await {
        return Err(JobFailure { error, results });
    }
    Ok(())
}

async fn attempt_image(
    app: &AppState,
    job: &JobEnvelope,
    index: usize,
    language: &str,
    prior: &[ImageResult],
) -> Result<ImageOutcome, JobError> {
    let Some(image_ref) = job.payload.image_ref(index) else {
        return Ok(ImageOutcome::Settled(failure_result(
            index,
            language,
            None,
            ErrorCode::ImageNotFound,
            "no image reference carries this index",
        )));
    };

    let resolved = match app.resolver.resolve(image_ref).await {
        Ok(resolved) => resolved,
        Err(error) => return Ok(ImageOutcome::Settled(resolve_failure(index, language, error)?)),
    };

    let tiers = app.providers.active_tiers();
    match run_cascade(app, job, index, language, &resolved.bytes, &tiers, prior).await? {
        CascadeOutcome::Suspended => Ok(ImageOutcome::Suspended),
        CascadeOutcome::Exhausted {
            last_attempted,
            last_error,
        } => Ok(ImageOutcome::Settled(failure_result(
            index,
            language,
            last_attempted,
            ErrorCode::OcrEngineError,
            last_error.as_deref().unwrap_or("no tier produced output"),
        ))),
    }
}

/// Map a resolver failure to a per-image result, or bubble transients for a
/// job-level retry.
fn resolve_failure(
    index: usize,
    language: &str,
    error: ResolveError,
) -> Result<ImageResult, JobError> {
    match error {
        ResolveError::Transient(message) => Err(JobError::Transient(message)),
        ResolveError::NotFound(message) => Ok(failure_result(
            index,
            language,
            None,
            ErrorCode::ImageNotFound,
            &message,
        )),
        ResolveError::UnsupportedMedia(message) => Ok(failure_result(
            index,
            language,
            None,
            ErrorCode::UnsupportedMedia,
            &message,
        )),
    }
}

/// Try tiers in order until one yields a candidate, then suspend on its
/// validation. Driver errors and timeouts advance to the next tier.
async fn run_cascade(
    app: &AppState,
    job: &JobEnvelope,
    index: usize,
    language: &str,
    bytes: &[u8],
    tiers: &[Tier],
    prior: &[ImageResult],
) -> Result<CascadeOutcome, JobError> {
    let mut last_attempted = None;
    let mut last_error = None;

    for (position, tier) in tiers.iter().copied().enumerate() {
        let Some(provider) = app.providers.get(tier) else {
            continue;
        };

        tracing::debug!(job_id = %job.job_id, image_index = index, tier = %tier, "Running tier");
        let attempt = tokio::time::timeout(
            app.config.tier_timeout(),
            provider.extract(bytes, language),
        )
        .await;

        let candidate = match attempt {
            Err(_) => {
                tracing::warn!(job_id = %job.job_id, tier = %tier, "Tier exceeded time budget");
                last_attempted = Some(tier);
                last_error = Some(format!("tier {tier} exceeded its time budget"));
                continue;
            }
            Ok(Err(e)) => {
                tracing::warn!(job_id = %job.job_id, tier = %tier, error = %e, "Tier failed");
                last_attempted = Some(tier);
                last_error = Some(e.to_string());
                continue;
            }
            Ok(Ok(candidate)) => candidate,
        };

        suspend_for_validation(app, job, index, tier, &tiers[position + 1..], candidate, prior)
            .await?;
        return Ok(CascadeOutcome::Suspended);
    }

    Ok(CascadeOutcome::Exhausted {
        last_attempted,
        last_error,
    })
}

/// Persist the cursor and enqueue the validator call. The candidate stored
/// (and later validated) is exactly the text that would be emitted.
async fn suspend_for_validation(
    app: &AppState,
    job: &JobEnvelope,
    index: usize,
    tier: Tier,
    remaining: &[Tier],
    candidate: Candidate,
    prior: &[ImageResult],
) -> Result<(), JobError> {
    let text_len = candidate.text.len();
    let (candidate_text, truncated) =
        text::truncate_utf8(&candidate.text, app.config.ocr_max_text_bytes);

    let correlation_id = format!("val-{}", Uuid::new_v4());
    let state = PendingValidation {
        correlation_id: correlation_id.clone(),
        job: job.clone(),
        image_index: index,
        tier,
        remaining_tiers: remaining.to_vec(),
        candidate_text,
        text_len,
        truncated,
        native_confidence: candidate.confidence.map(text::clamp_confidence),
        results: prior.to_vec(),
        attempt: job.attempt,
        created_at: Utc::now(),
    };

    app.state_store.save(&state).await?;

    if let Err(e) = app.validator.enqueue(&correlation_id, &state.candidate_text).await {
        // Without a callback coming the state would only rot until the
        // sweeper times it out; reclaim it now and retry the job instead.
        let _ = app.state_store.delete(&correlation_id).await;
        return Err(e.into());
    }

    metrics::counter!("ocr_validations_enqueued").increment(1);
    tracing::info!(
        job_id = %job.job_id,
        image_index = index,
        tier = %tier,
        correlation_id = %correlation_id,
        "Suspended awaiting validation verdict"
    );
    Ok(())
}

/// Rejected verdict with tiers left: re-resolve the image and continue the
/// cascade from the first remaining tier.
async fn retry_with_remaining(
    app: &AppState,
    pending: PendingValidation,
    language: &str,
) -> Result<(), JobFailure> {
    let job = pending.job.clone();
    let index = pending.image_index;

    let Some(image_ref) = job.payload.image_ref(index) else {
        let result = failure_result(
            index,
            language,
            None,
            ErrorCode::ImageNotFound,
            "no image reference carries this index",
        );
        return continue_after(app, &job, index, pending.results, result).await;
    };

    let resolved = match app.resolver.resolve(image_ref).await {
        Ok(resolved) => resolved,
        Err(error) => {
            return match resolve_failure(index, language, error) {
                Ok(result) => continue_after(app, &job, index, pending.results, result).await,
                Err(error) => Err(JobFailure {
                    error,
                    results: pending.results,
                }),
            };
        }
    };

    match run_cascade(
        app,
        &job,
        index,
        language,
        &resolved.bytes,
        &pending.remaining_tiers,
        &pending.results,
    )
    .await
    {
        Ok(CascadeOutcome::Suspended) => Ok(()),
        Ok(CascadeOutcome::Exhausted {
            last_attempted,
            last_error,
        }) => {
            // A candidate was produced earlier and rejected, so exhaustion
            // here is a validation failure, not an engine failure.
            let result = failure_result(
                index,
                language,
                last_attempted.or(Some(pending.tier)),
                ErrorCode::OcrNoValidOutput,
                last_error
                    .as_deref()
                    .unwrap_or("all tiers failed validation"),
            );
            continue_after(app, &job, index, pending.results, result).await
        }
        Err(error) => Err(JobFailure {
            error,
            results: pending.results,
        }),
    }
}

async fn continue_after(
    app: &AppState,
    job: &JobEnvelope,
    settled_index: usize,
    mut results: Vec<ImageResult>,
    result: ImageResult,
) -> Result<(), JobFailure> {
    results.push(result);
    advance_from(app, job, settled_index + 1, results).await
}

async fn emit_completion(
    app: &AppState,
    job: &JobEnvelope,
    results: &[ImageResult],
    error: Option<ErrorInfo>,
) -> Result<(), JobError> {
    let Some(reply_to) = job.reply_to.as_deref() else {
        tracing::warn!(job_id = %job.job_id, "No reply_to queue, completion not sent");
        return Ok(());
    };

    let completion = build_completion(job, results.to_vec(), error);
    app.queue.push(reply_to, &completion).await?;

    let status = completion.payload.status;
    match status {
        JobStatus::Success => metrics::counter!("ocr_jobs_completed").increment(1),
        JobStatus::Failed => metrics::counter!("ocr_jobs_failed").increment(1),
    }
    let elapsed = (Utc::now() - job.created_at).num_milliseconds().max(0) as f64 / 1000.0;
    metrics::histogram!("ocr_job_duration_seconds").record(elapsed);

    tracing::info!(
        job_id = %job.job_id,
        workflow_id = %job.workflow_id,
        completion_job_id = %completion.job_id,
        reply_to = %reply_to,
        status = %status,
        valid_images = completion.payload.results.iter().filter(|r| r.meta.is_valid).count(),
        "Completion emitted"
    );
    Ok(())
}

/// Retry policy for job-level transients: re-push to the back of the input
/// queue until the attempt ceiling, then emit a terminal failure whose
/// results still cover every requested image.
pub async fn requeue_or_fail(
    app: &AppState,
    job: &JobEnvelope,
    cause: &str,
    results: Vec<ImageResult>,
) {
    if job.attempt < app.config.ocr_max_attempts {
        let mut retry = job.clone();
        retry.attempt += 1;
        match app.queue.push(INPUT_QUEUE, &retry).await {
            Ok(()) => tracing::info!(
                job_id = %job.job_id,
                attempt = retry.attempt,
                cause = %cause,
                "Job re-queued for retry"
            ),
            Err(e) => tracing::error!(
                job_id = %job.job_id,
                error = %e,
                "Failed to re-queue job, it will be lost"
            ),
        }
        return;
    }

    let message = format!("gave up after {} attempts: {cause}", job.attempt);
    let language = job
        .payload
        .language(&app.config.ocr_language_default)
        .to_string();
    let results = pad_missing_results(job, results, &language, &message);
    let error = ErrorInfo::new(ErrorCode::ExhaustedRetries, message);
    if let Err(e) = emit_completion(app, job, &results, Some(error)).await {
        tracing::error!(job_id = %job.job_id, error = %e, "Failed to emit terminal failure");
    }
}

/// Fill every index that never settled with a failed placeholder so the
/// emitted completion keeps one entry per requested image.
fn pad_missing_results(
    job: &JobEnvelope,
    mut results: Vec<ImageResult>,
    language: &str,
    message: &str,
) -> Vec<ImageResult> {
    let settled: HashSet<usize> = results.iter().map(|r| r.index).collect();
    for index in 0..job.payload.image_count() {
        if !settled.contains(&index) {
            results.push(failure_result(
                index,
                language,
                None,
                ErrorCode::ExhaustedRetries,
                message,
            ));
        }
    }
    results
}

/// Claim pending states whose validation deadline passed without a callback
/// and route them through the retry policy.
pub async fn sweep_expired(app: &AppState) {
    let due = match app.state_store.due_deadlines(Utc::now()).await {
        Ok(due) => due,
        Err(e) => {
            tracing::warn!(error = %e, "Deadline sweep failed");
            return;
        }
    };

    for correlation_id in due {
        match app.state_store.take(&correlation_id).await {
            Ok(Some(pending)) => {
                metrics::counter!("ocr_validation_timeouts").increment(1);
                tracing::warn!(
                    correlation_id = %correlation_id,
                    job_id = %pending.job.job_id,
                    tier = %pending.tier,
                    "Validation deadline elapsed without callback"
                );
                let job = pending.job.clone();
                requeue_or_fail(
                    app,
                    &job,
                    "validator timeout: no callback before the deadline",
                    pending.results,
                )
                .await;
            }
            // the callback won the race; nothing to recover
            Ok(None) => {}
            Err(e) => tracing::warn!(
                correlation_id = %correlation_id,
                error = %e,
                "Failed to claim expired state"
            ),
        }
    }

    if let Ok(depth) = app.queue.depth(INPUT_QUEUE).await {
        metrics::gauge!("ocr_queue_depth").set(depth as f64);
    }
}

/// Confidence reported in `meta`: engine-native when present, else the
/// validator's, else a length heuristic.
fn reported_confidence(native: Option<f64>, validator: Option<f64>, text_len: usize) -> f64 {
    native
        .or(validator)
        .map(text::clamp_confidence)
        .unwrap_or_else(|| (text_len as f64 / 200.0).min(1.0))
}

fn truncate_reason(reason: &str) -> String {
    reason.chars().take(200).collect()
}

fn accepted_result(pending: &PendingValidation, verdict: &Verdict, language: &str) -> ImageResult {
    ImageResult {
        index: pending.image_index,
        ocr_text: pending.candidate_text.clone(),
        truncated: pending.truncated,
        meta: ResultMeta {
            language: language.to_string(),
            confidence: reported_confidence(
                pending.native_confidence,
                verdict.confidence,
                pending.text_len,
            ),
            text_len: pending.text_len,
            is_valid: true,
            tier: Some(pending.tier),
            validation_reason: verdict.reason.as_deref().map(truncate_reason),
        },
        error: None,
    }
}

/// Final rejection: every tier's candidate was judged invalid. The last
/// candidate is still reported so callers can inspect what was read.
fn rejected_result(pending: &PendingValidation, verdict: &Verdict, language: &str) -> ImageResult {
    let reason = verdict
        .reason
        .as_deref()
        .unwrap_or("all tiers failed validation");
    ImageResult {
        index: pending.image_index,
        ocr_text: pending.candidate_text.clone(),
        truncated: pending.truncated,
        meta: ResultMeta {
            language: language.to_string(),
            confidence: reported_confidence(
                pending.native_confidence,
                verdict.confidence,
                pending.text_len,
            ),
            text_len: pending.text_len,
            is_valid: false,
            tier: Some(pending.tier),
            validation_reason: Some(truncate_reason(reason)),
        },
        error: Some(ErrorInfo::new(ErrorCode::OcrNoValidOutput, reason)),
    }
}

fn failure_result(
    index: usize,
    language: &str,
    tier: Option<Tier>,
    code: ErrorCode,
    message: &str,
) -> ImageResult {
    ImageResult {
        index,
        ocr_text: String::new(),
        truncated: false,
        meta: ResultMeta {
            language: language.to_string(),
            confidence: 0.0,
            text_len: 0,
            is_valid: false,
            tier,
            validation_reason: Some(truncate_reason(message)),
        },
        error: Some(ErrorInfo::new(code, message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_job() -> JobEnvelope {
        parse_request(&json!({
            "schema_version": 1,
            "job_id": "job-1",
            "workflow_id": "wf-1",
            "job_type": "ocr.extract_text.requested",
            "source": "recipe-ingester",
            "target": "jarvis-ocr-service",
            "created_at": "2026-08-02T10:00:00Z",
            "attempt": 1,
            "reply_to": "replies",
            "payload": {
                "image_refs": [{"kind": "local_path", "value": "a.png", "index": 0}]
            },
            "trace": {"request_id": null, "parent_job_id": null}
        }))
        .unwrap()
    }

    fn pending(remaining: Vec<Tier>) -> PendingValidation {
        PendingValidation {
            correlation_id: "val-x".to_string(),
            job: test_job(),
            image_index: 0,
            tier: Tier::Tesseract,
            remaining_tiers: remaining,
            candidate_text: "Hello".to_string(),
            text_len: 5,
            truncated: false,
            native_confidence: None,
            results: Vec::new(),
            attempt: 1,
            created_at: Utc::now(),
        }
    }

    fn verdict(is_valid: bool, confidence: Option<f64>) -> Verdict {
        Verdict {
            is_valid,
            confidence,
            reason: Some("because".to_string()),
        }
    }

    #[test]
    fn accepts_valid_verdict() {
        let decision = decide(&pending(vec![Tier::LlmCloud]), &verdict(true, Some(0.9)), None);
        assert_eq!(decision, Decision::Accept);
    }

    #[test]
    fn invalid_verdict_advances_tier_when_tiers_remain() {
        let decision = decide(&pending(vec![Tier::LlmCloud]), &verdict(false, Some(0.9)), None);
        assert_eq!(decision, Decision::NextTier);
    }

    #[test]
    fn invalid_verdict_exhausts_when_no_tiers_remain() {
        let decision = decide(&pending(Vec::new()), &verdict(false, Some(0.2)), None);
        assert_eq!(decision, Decision::Exhausted);
    }

    #[test]
    fn confidence_floor_rejects_weak_accepts() {
        let decision = decide(
            &pending(vec![Tier::LlmCloud]),
            &verdict(true, Some(0.4)),
            Some(0.7),
        );
        assert_eq!(decision, Decision::NextTier);

        let decision = decide(&pending(Vec::new()), &verdict(true, None), Some(0.7));
        assert_eq!(decision, Decision::Exhausted);
    }

    #[test]
    fn confidence_prefers_native_then_validator_then_heuristic() {
        assert_eq!(reported_confidence(Some(0.8), Some(0.3), 1000), 0.8);
        assert_eq!(reported_confidence(None, Some(0.3), 1000), 0.3);
        // heuristic: min(1.0, text_len / 200)
        assert_eq!(reported_confidence(None, None, 100), 0.5);
        assert_eq!(reported_confidence(None, None, 1000), 1.0);
    }

    #[test]
    fn accepted_result_reports_winning_tier() {
        let state = pending(vec![Tier::LlmCloud]);
        let result = accepted_result(&state, &verdict(true, Some(0.9)), "en");

        assert_eq!(result.index, 0);
        assert_eq!(result.ocr_text, "Hello");
        assert!(!result.truncated);
        assert!(result.meta.is_valid);
        assert_eq!(result.meta.tier, Some(Tier::Tesseract));
        assert_eq!(result.meta.confidence, 0.9);
        assert_eq!(result.meta.text_len, 5);
        assert_eq!(result.meta.validation_reason.as_deref(), Some("because"));
        assert!(result.error.is_none());
    }

    #[test]
    fn rejected_result_carries_no_valid_output_error() {
        let mut state = pending(Vec::new());
        state.tier = Tier::Easyocr;
        let result = rejected_result(&state, &verdict(false, Some(0.1)), "en");

        assert!(!result.meta.is_valid);
        assert_eq!(result.meta.tier, Some(Tier::Easyocr));
        let error = result.error.expect("per-image error");
        assert_eq!(error.code, ErrorCode::OcrNoValidOutput);
    }

    #[test]
    fn failure_result_shapes_resolver_errors() {
        let result = failure_result(2, "en", None, ErrorCode::UnsupportedMedia, "PDF");
        assert_eq!(result.index, 2);
        assert!(!result.meta.is_valid);
        assert_eq!(result.meta.text_len, 0);
        assert_eq!(result.error.expect("error").code, ErrorCode::UnsupportedMedia);
    }

    #[test]
    fn truncated_candidate_keeps_full_text_len() {
        let mut state = pending(Vec::new());
        state.candidate_text = "x".repeat(100);
        state.text_len = 60_000;
        state.truncated = true;

        let result = accepted_result(&state, &verdict(true, Some(0.9)), "en");
        assert!(result.truncated);
        assert_eq!(result.meta.text_len, 60_000);
        assert_eq!(result.ocr_text.len(), 100);
    }

    #[test]
    fn padded_results_cover_every_requested_index() {
        let job = parse_request(&json!({
            "schema_version": 1,
            "job_id": "job-2",
            "workflow_id": "wf-2",
            "job_type": "ocr.extract_text.requested",
            "source": "recipe-ingester",
            "target": "jarvis-ocr-service",
            "created_at": "2026-08-02T10:00:00Z",
            "attempt": 3,
            "reply_to": "replies",
            "payload": {
                "image_refs": [
                    {"kind": "local_path", "value": "a.png", "index": 0},
                    {"kind": "local_path", "value": "b.png", "index": 1},
                    {"kind": "local_path", "value": "c.png", "index": 2}
                ]
            },
            "trace": {"request_id": null, "parent_job_id": null}
        }))
        .unwrap();

        let settled = vec![accepted_result(
            &pending(Vec::new()),
            &verdict(true, Some(0.9)),
            "en",
        )];
        let padded = pad_missing_results(&job, settled, "en", "gave up");

        assert_eq!(padded.len(), job.payload.image_count());
        let mut indices: Vec<_> = padded.iter().map(|r| r.index).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2]);

        // the settled result survives untouched, the rest are placeholders
        assert!(padded[0].meta.is_valid);
        for placeholder in &padded[1..] {
            assert!(!placeholder.meta.is_valid);
            let error = placeholder.error.as_ref().expect("placeholder error");
            assert_eq!(error.code, ErrorCode::ExhaustedRetries);
        }
    }

    #[test]
    fn resolve_failure_classifies_per_image_and_transient() {
        let settled = resolve_failure(0, "en", ResolveError::NotFound("gone".to_string())).unwrap();
        assert_eq!(settled.error.expect("error").code, ErrorCode::ImageNotFound);

        let settled =
            resolve_failure(0, "en", ResolveError::UnsupportedMedia("pdf".to_string())).unwrap();
        assert_eq!(settled.error.expect("error").code, ErrorCode::UnsupportedMedia);

        let bubbled = resolve_failure(0, "en", ResolveError::Transient("s3 down".to_string()));
        assert!(matches!(bubbled, Err(JobError::Transient(_))));
    }
}
