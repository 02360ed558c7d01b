use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::models::tier::{parse_tier_list, Tier, UnknownTier};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Redis host backing the input queue, reply queues, and state store.
    pub redis_host: String,

    #[serde(default = "default_redis_port")]
    pub redis_port: u16,

    #[serde(default)]
    pub redis_password: Option<String>,

    /// Bind address for the callback/health server.
    #[serde(default = "default_bind_addr")]
    pub ocr_bind_addr: String,

    /// Externally reachable base URL of this service, used to build the
    /// validator callback URL.
    pub ocr_public_url: String,

    /// Per-image truncation threshold in bytes.
    #[serde(default = "default_max_text_bytes")]
    pub ocr_max_text_bytes: usize,

    /// Job-level retry ceiling.
    #[serde(default = "default_max_attempts")]
    pub ocr_max_attempts: u32,

    #[serde(default = "default_language")]
    pub ocr_language_default: String,

    /// Model hint forwarded to the validator proxy.
    #[serde(default = "default_validation_model")]
    pub ocr_validation_model: String,

    /// Optional floor on validator confidence for accepting a tier.
    #[serde(default)]
    pub ocr_min_confidence: Option<f64>,

    /// Ordered comma list of tiers to cascade through.
    #[serde(default = "default_enabled_tiers")]
    pub ocr_enabled_tiers: String,

    #[serde(default = "default_state_ttl")]
    pub ocr_validation_state_ttl_seconds: u64,

    /// Soft wall-clock budget per tier attempt.
    #[serde(default = "default_tier_timeout")]
    pub ocr_tier_timeout_seconds: u64,

    /// Maximum number of jobs processed concurrently by one worker.
    #[serde(default = "default_worker_concurrency")]
    pub ocr_worker_concurrency: usize,

    #[serde(default = "default_sweep_interval")]
    pub ocr_sweep_interval_seconds: u64,

    /// Bound on how long the callback server may drain after a termination
    /// signal before it is forced down.
    #[serde(default = "default_shutdown_deadline")]
    pub ocr_shutdown_deadline_seconds: u64,

    /// Root under which `local_path` references are resolved.
    #[serde(default = "default_image_root")]
    pub ocr_image_root: PathBuf,

    /// Vision-framework helper binary for the apple_vision tier.
    #[serde(default = "default_vision_helper")]
    pub ocr_apple_vision_helper: String,

    /// Base URL of the LLM proxy (validator queue and LLM OCR tiers).
    pub llm_proxy_url: String,

    pub llm_proxy_app_id: String,

    pub llm_proxy_app_key: String,

    /// Custom S3-compatible endpoint (MinIO).
    #[serde(default)]
    pub s3_endpoint_url: Option<String>,

    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    #[serde(default)]
    pub s3_force_path_style: bool,

    #[serde(default)]
    pub s3_access_key: Option<String>,

    #[serde(default)]
    pub s3_secret_key: Option<String>,
}

fn default_redis_port() -> u16 {
    6379
}

fn default_bind_addr() -> String {
    "0.0.0.0:5009".to_string()
}

fn default_max_text_bytes() -> usize {
    51200
}

fn default_max_attempts() -> u32 {
    3
}

fn default_language() -> String {
    "en".to_string()
}

fn default_validation_model() -> String {
    "llm_local_light".to_string()
}

fn default_enabled_tiers() -> String {
    "tesseract,easyocr,paddleocr,apple_vision,llm_local,llm_cloud".to_string()
}

fn default_state_ttl() -> u64 {
    600
}

fn default_tier_timeout() -> u64 {
    60
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_shutdown_deadline() -> u64 {
    20
}

fn default_image_root() -> PathBuf {
    PathBuf::from("/data/images")
}

fn default_vision_helper() -> String {
    "ocr-vision-helper".to_string()
}

fn default_s3_region() -> String {
    "us-east-2".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn redis_url(&self) -> String {
        match &self.redis_password {
            Some(password) => {
                format!("redis://:{password}@{}:{}", self.redis_host, self.redis_port)
            }
            None => format!("redis://{}:{}", self.redis_host, self.redis_port),
        }
    }

    /// Tiers requested by configuration, in configured order. Availability
    /// filtering happens when the provider registry bootstraps.
    pub fn enabled_tiers(&self) -> Result<Vec<Tier>, UnknownTier> {
        parse_tier_list(&self.ocr_enabled_tiers)
    }

    pub fn validation_state_ttl(&self) -> Duration {
        Duration::from_secs(self.ocr_validation_state_ttl_seconds)
    }

    pub fn tier_timeout(&self) -> Duration {
        Duration::from_secs(self.ocr_tier_timeout_seconds)
    }

    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_secs(self.ocr_shutdown_deadline_seconds)
    }

    pub fn callback_url(&self) -> String {
        format!(
            "{}/internal/validation/callback",
            self.ocr_public_url.trim_end_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn test_config() -> AppConfig {
        AppConfig {
            redis_host: "localhost".to_string(),
            redis_port: default_redis_port(),
            redis_password: None,
            ocr_bind_addr: default_bind_addr(),
            ocr_public_url: "http://ocr.internal:5009/".to_string(),
            ocr_max_text_bytes: default_max_text_bytes(),
            ocr_max_attempts: default_max_attempts(),
            ocr_language_default: default_language(),
            ocr_validation_model: default_validation_model(),
            ocr_min_confidence: None,
            ocr_enabled_tiers: default_enabled_tiers(),
            ocr_validation_state_ttl_seconds: default_state_ttl(),
            ocr_tier_timeout_seconds: default_tier_timeout(),
            ocr_worker_concurrency: default_worker_concurrency(),
            ocr_sweep_interval_seconds: default_sweep_interval(),
            ocr_shutdown_deadline_seconds: default_shutdown_deadline(),
            ocr_image_root: default_image_root(),
            ocr_apple_vision_helper: default_vision_helper(),
            llm_proxy_url: "http://llm-proxy:8080".to_string(),
            llm_proxy_app_id: "ocr".to_string(),
            llm_proxy_app_key: "secret".to_string(),
            s3_endpoint_url: None,
            s3_region: default_s3_region(),
            s3_force_path_style: false,
            s3_access_key: None,
            s3_secret_key: None,
        }
    }

    #[test]
    fn redis_url_with_and_without_password() {
        let mut config = test_config();
        assert_eq!(config.redis_url(), "redis://localhost:6379");
        config.redis_password = Some("hunter2".to_string());
        assert_eq!(config.redis_url(), "redis://:hunter2@localhost:6379");
    }

    #[test]
    fn default_tier_list_covers_full_cascade() {
        let config = test_config();
        let tiers = config.enabled_tiers().unwrap();
        assert_eq!(tiers.len(), 6);
        assert_eq!(tiers[0], Tier::Tesseract);
        assert_eq!(tiers[5], Tier::LlmCloud);
    }

    #[test]
    fn callback_url_strips_trailing_slash() {
        let config = test_config();
        assert_eq!(
            config.callback_url(),
            "http://ocr.internal:5009/internal/validation/callback"
        );
    }
}
