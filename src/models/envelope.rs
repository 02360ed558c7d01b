use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use crate::models::tier::Tier;

/// Discriminator of incoming extraction requests.
pub const OCR_REQUEST_TYPE: &str = "ocr.extract_text.requested";
/// Discriminator of the terminal event pushed to the reply queue.
pub const OCR_COMPLETED_TYPE: &str = "ocr.completed";
/// `source` stamped on every emitted completion.
pub const SERVICE_SOURCE: &str = "jarvis-ocr-service";

const SUPPORTED_SCHEMA_VERSION: u32 = 1;
const MAX_IMAGES_PER_JOB: usize = 8;
const MAX_REASON_CHARS: usize = 200;

/// Stable error codes surfaced in completion envelopes and image results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    UnsupportedMedia,
    ImageNotFound,
    OcrEngineError,
    OcrNoValidOutput,
    OcrAllImagesFailed,
    ValidatorTimeout,
    ExhaustedRetries,
    BadCallback,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.chars().count() > MAX_REASON_CHARS {
            message = message.chars().take(MAX_REASON_CHARS).collect();
        }
        Self { code, message }
    }
}

/// Origin of one image reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ImageKind {
    LocalPath,
    S3,
    Minio,
    Db,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRef {
    pub kind: ImageKind,
    pub value: String,
    pub index: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestOptions {
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPayload {
    pub image_refs: Vec<ImageRef>,
    #[serde(default)]
    pub image_count: Option<usize>,
    #[serde(default)]
    pub options: Option<RequestOptions>,
}

impl RequestPayload {
    pub fn image_count(&self) -> usize {
        self.image_count.unwrap_or(self.image_refs.len())
    }

    pub fn language<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.options
            .as_ref()
            .and_then(|o| o.language.as_deref())
            .unwrap_or(fallback)
    }

    pub fn image_ref(&self, index: usize) -> Option<&ImageRef> {
        self.image_refs.iter().find(|r| r.index == index)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trace {
    pub request_id: Option<String>,
    pub parent_job_id: Option<String>,
}

/// An OCR extraction request popped from the input queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub schema_version: u32,
    pub job_id: String,
    pub workflow_id: String,
    pub job_type: String,
    pub source: String,
    pub target: String,
    pub created_at: DateTime<Utc>,
    pub attempt: u32,
    pub reply_to: Option<String>,
    pub payload: RequestPayload,
    pub trace: Trace,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SchemaError(String);

impl SchemaError {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Parse and validate an incoming queue message.
///
/// Validation happens on the raw JSON so that a violation anywhere in the
/// envelope produces a `bad_request` diagnostic instead of an opaque
/// deserialization failure.
pub fn parse_request(value: &serde_json::Value) -> Result<JobEnvelope, SchemaError> {
    let obj = value
        .as_object()
        .ok_or_else(|| SchemaError::new("message must be a JSON object"))?;

    for field in [
        "schema_version",
        "job_id",
        "workflow_id",
        "job_type",
        "source",
        "target",
        "created_at",
        "attempt",
        "reply_to",
        "payload",
        "trace",
    ] {
        if !obj.contains_key(field) {
            return Err(SchemaError::new(format!("missing required field: {field}")));
        }
    }

    if obj["schema_version"].as_u64() != Some(u64::from(SUPPORTED_SCHEMA_VERSION)) {
        return Err(SchemaError::new(format!(
            "invalid schema_version: {}, expected {SUPPORTED_SCHEMA_VERSION}",
            obj["schema_version"]
        )));
    }

    if obj["job_type"].as_str() != Some(OCR_REQUEST_TYPE) {
        return Err(SchemaError::new(format!(
            "invalid job_type: {}, expected '{OCR_REQUEST_TYPE}'",
            obj["job_type"]
        )));
    }

    match obj["reply_to"].as_str() {
        Some(name) if !name.is_empty() => {}
        _ => return Err(SchemaError::new("reply_to must be a non-empty string")),
    }

    match obj["attempt"].as_u64() {
        Some(n) if n >= 1 => {}
        _ => return Err(SchemaError::new("attempt must be an integer >= 1")),
    }

    let envelope: JobEnvelope = serde_json::from_value(value.clone())
        .map_err(|e| SchemaError::new(format!("malformed envelope: {e}")))?;

    validate_payload(&envelope.payload)?;
    Ok(normalize_request(envelope))
}

fn validate_payload(payload: &RequestPayload) -> Result<(), SchemaError> {
    let count = payload.image_refs.len();
    if count < 1 || count > MAX_IMAGES_PER_JOB {
        return Err(SchemaError::new(format!(
            "payload.image_refs must have 1-{MAX_IMAGES_PER_JOB} items, got {count}"
        )));
    }

    if let Some(declared) = payload.image_count {
        if declared != count {
            return Err(SchemaError::new(format!(
                "payload.image_count ({declared}) must match image_refs length ({count})"
            )));
        }
    }

    let mut seen = HashSet::new();
    for image_ref in &payload.image_refs {
        if image_ref.value.is_empty() {
            return Err(SchemaError::new("image_refs[].value must be non-empty"));
        }
        if image_ref.index >= count {
            return Err(SchemaError::new(format!(
                "image_refs[].index {} out of range for {count} images",
                image_ref.index
            )));
        }
        if !seen.insert(image_ref.index) {
            return Err(SchemaError::new(format!(
                "duplicate index {} in image_refs",
                image_ref.index
            )));
        }
    }

    if let Some(options) = &payload.options {
        if let Some(language) = &options.language {
            if language.is_empty() {
                return Err(SchemaError::new(
                    "payload.options.language must be non-empty",
                ));
            }
        }
    }

    Ok(())
}

fn normalize_request(mut envelope: JobEnvelope) -> JobEnvelope {
    envelope.payload.image_count = Some(envelope.payload.image_refs.len());
    envelope
}

/// Completion status for the whole job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMeta {
    pub language: String,
    pub confidence: f64,
    pub text_len: usize,
    pub is_valid: bool,
    pub tier: Option<Tier>,
    pub validation_reason: Option<String>,
}

/// Outcome of one image in the request, aligned by `index`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResult {
    pub index: usize,
    pub ocr_text: String,
    pub truncated: bool,
    pub meta: ResultMeta,
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionPayload {
    pub status: JobStatus,
    pub results: Vec<ImageResult>,
    pub artifact_ref: Option<String>,
    pub error: Option<ErrorInfo>,
}

/// The single terminal event emitted per job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionEnvelope {
    pub schema_version: u32,
    pub job_id: String,
    pub workflow_id: String,
    pub job_type: String,
    pub source: String,
    pub target: String,
    pub created_at: DateTime<Utc>,
    pub attempt: u32,
    pub reply_to: Option<String>,
    pub payload: CompletionPayload,
    pub trace: Trace,
}

/// Build the completion for a finished job.
///
/// `status` is `success` iff at least one result passed validation; a
/// job-level `error` forces `failed` regardless of results.
pub fn build_completion(
    original: &JobEnvelope,
    mut results: Vec<ImageResult>,
    error: Option<ErrorInfo>,
) -> CompletionEnvelope {
    results.sort_by_key(|r| r.index);

    let any_valid = results.iter().any(|r| r.meta.is_valid);
    let status = if any_valid && error.is_none() {
        JobStatus::Success
    } else {
        JobStatus::Failed
    };

    let error = match status {
        JobStatus::Success => None,
        JobStatus::Failed => Some(error.unwrap_or_else(|| {
            ErrorInfo::new(
                ErrorCode::OcrAllImagesFailed,
                "no image produced validator-accepted text",
            )
        })),
    };

    CompletionEnvelope {
        schema_version: SUPPORTED_SCHEMA_VERSION,
        job_id: Uuid::new_v4().to_string(),
        workflow_id: original.workflow_id.clone(),
        job_type: OCR_COMPLETED_TYPE.to_string(),
        source: SERVICE_SOURCE.to_string(),
        target: original.source.clone(),
        created_at: Utc::now(),
        attempt: 1,
        reply_to: None,
        payload: CompletionPayload {
            status,
            results,
            artifact_ref: None,
            error,
        },
        trace: Trace {
            request_id: original.trace.request_id.clone(),
            parent_job_id: Some(original.job_id.clone()),
        },
    }
}

/// Build a `bad_request` completion from a message that failed schema
/// validation, salvaging whatever identifying fields are present.
///
/// Returns `None` when the message carries no usable `reply_to`.
pub fn failure_completion_for_raw(
    raw: &serde_json::Value,
    error: ErrorInfo,
) -> Option<(String, CompletionEnvelope)> {
    let reply_to = raw.get("reply_to")?.as_str()?.to_string();
    if reply_to.is_empty() {
        return None;
    }

    let str_field = |name: &str| {
        raw.get(name)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };

    let completion = CompletionEnvelope {
        schema_version: SUPPORTED_SCHEMA_VERSION,
        job_id: Uuid::new_v4().to_string(),
        workflow_id: str_field("workflow_id"),
        job_type: OCR_COMPLETED_TYPE.to_string(),
        source: SERVICE_SOURCE.to_string(),
        target: str_field("source"),
        created_at: Utc::now(),
        attempt: 1,
        reply_to: None,
        payload: CompletionPayload {
            status: JobStatus::Failed,
            results: Vec::new(),
            artifact_ref: None,
            error: Some(error),
        },
        trace: Trace {
            request_id: raw
                .get("trace")
                .and_then(|t| t.get("request_id"))
                .and_then(|v| v.as_str())
                .map(str::to_string),
            parent_job_id: raw
                .get("job_id")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        },
    };

    Some((reply_to, completion))
}
