use std::time::Duration;

use garde::Validate;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;

/// Candidate text beyond this many characters is not forwarded; the verdict
/// on the head of the text is representative and the payload stays bounded.
const MAX_CANDIDATE_CHARS: usize = 500;

const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for enqueueing validity checks on the LLM proxy's job queue.
///
/// The proxy judges the candidate asynchronously and POSTs its verdict to
/// `callback_url`, carrying the `correlation_id` under which the pending
/// state is stored.
pub struct ValidatorClient {
    http: Client,
    enqueue_url: String,
    callback_url: String,
    app_id: String,
    app_key: String,
    model_hint: String,
}

#[derive(Serialize)]
struct EnqueueRequest<'a> {
    candidate_text: &'a str,
    callback_url: &'a str,
    correlation_id: &'a str,
    model_hint: &'a str,
}

/// Verdict POSTed back by the validator.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Verdict {
    #[garde(skip)]
    pub is_valid: bool,

    #[garde(inner(range(min = 0.0, max = 1.0)))]
    pub confidence: Option<f64>,

    #[garde(inner(length(max = 200)))]
    pub reason: Option<String>,
}

impl ValidatorClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            http: Client::new(),
            enqueue_url: format!(
                "{}/internal/queue/enqueue",
                config.llm_proxy_url.trim_end_matches('/')
            ),
            callback_url: config.callback_url(),
            app_id: config.llm_proxy_app_id.clone(),
            app_key: config.llm_proxy_app_key.clone(),
            model_hint: config.ocr_validation_model.clone(),
        }
    }

    /// Enqueue a validation request. Failure here is a job-level transient:
    /// the suspended job would never be resumed, so the caller retries the
    /// whole job instead.
    pub async fn enqueue(
        &self,
        correlation_id: &str,
        candidate_text: &str,
    ) -> Result<(), ValidatorError> {
        let capped: String = candidate_text.chars().take(MAX_CANDIDATE_CHARS).collect();
        let request = EnqueueRequest {
            candidate_text: &capped,
            callback_url: &self.callback_url,
            correlation_id,
            model_hint: &self.model_hint,
        };

        let response = self
            .http
            .post(&self.enqueue_url)
            .timeout(ENQUEUE_TIMEOUT)
            .header("X-Jarvis-App-Id", &self.app_id)
            .header("X-Jarvis-App-Key", &self.app_key)
            .json(&request)
            .send()
            .await
            .map_err(ValidatorError::Http)?;

        if !response.status().is_success() {
            return Err(ValidatorError::Rejected {
                status: response.status().as_u16(),
            });
        }

        tracing::debug!(
            correlation_id = %correlation_id,
            candidate_chars = capped.chars().count(),
            "Validation request enqueued"
        );
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ValidatorError {
    #[error("validator enqueue request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("validator enqueue rejected with status {status}")]
    Rejected { status: u16 },
}
