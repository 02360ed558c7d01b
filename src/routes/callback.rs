use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app_state::AppState;
use crate::pipeline;
use crate::services::validator::Verdict;

/// Body POSTed by the validator proxy when a verdict is ready.
#[derive(Debug, Deserialize, Validate)]
pub struct CallbackPayload {
    #[garde(length(min = 1))]
    pub correlation_id: String,

    #[serde(flatten)]
    #[garde(dive)]
    pub verdict: Verdict,
}

fn bad_callback(detail: String) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": {"code": "bad_callback", "message": detail}})),
    )
}

/// POST /internal/validation/callback — receive a validator verdict and hand
/// it to the resumer. A thin adapter: no OCR work happens on this path
/// before the 200 goes out.
pub async fn validation_callback(
    State(state): State<AppState>,
    body: String,
) -> (StatusCode, Json<Value>) {
    let payload: CallbackPayload = match serde_json::from_str(&body) {
        Ok(payload) => payload,
        Err(e) => return bad_callback(e.to_string()),
    };
    if let Err(report) = payload.validate() {
        return bad_callback(report.to_string());
    }

    tracing::info!(
        correlation_id = %payload.correlation_id,
        is_valid = payload.verdict.is_valid,
        "Received validation callback"
    );

    // Load-then-delete claim: a duplicate or stale callback finds nothing
    // and gets a 404 instead of re-driving the job.
    let pending = match state.state_store.take(&payload.correlation_id).await {
        Ok(Some(pending)) => pending,
        Ok(None) => {
            tracing::warn!(
                correlation_id = %payload.correlation_id,
                "No pending state for callback (stale, duplicate, or expired)"
            );
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "validation state not found or expired"})),
            );
        }
        Err(e) => {
            tracing::error!(correlation_id = %payload.correlation_id, error = %e, "State store error");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "state store unavailable"})),
            );
        }
    };

    let app = state.clone();
    tokio::spawn(async move {
        pipeline::resume(&app, pending, payload.verdict).await;
    });

    (StatusCode::OK, Json(json!({"status": "ok"})))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_parses_flat_contract_shape() {
        let payload: CallbackPayload = serde_json::from_value(json!({
            "correlation_id": "val-1",
            "is_valid": true,
            "confidence": 0.92,
            "reason": "readable English"
        }))
        .unwrap();
        assert_eq!(payload.correlation_id, "val-1");
        assert!(payload.verdict.is_valid);
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn payload_rejects_missing_fields_and_bad_ranges() {
        assert!(serde_json::from_value::<CallbackPayload>(json!({"is_valid": true})).is_err());

        let payload: CallbackPayload = serde_json::from_value(json!({
            "correlation_id": "val-1",
            "is_valid": true,
            "confidence": 3.0
        }))
        .unwrap();
        assert!(payload.validate().is_err());

        let payload: CallbackPayload = serde_json::from_value(json!({
            "correlation_id": "",
            "is_valid": false
        }))
        .unwrap();
        assert!(payload.validate().is_err());
    }
}
