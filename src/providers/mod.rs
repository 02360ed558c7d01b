//! OCR tier drivers behind a uniform extraction capability.
//!
//! Availability is probed once at bootstrap; the registry keeps only the
//! tiers whose engine actually works on this host, in configured order.

use std::sync::Arc;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::process::Command;

use crate::config::AppConfig;
use crate::models::tier::{Tier, UnknownTier};

pub mod apple_vision;
pub mod easyocr;
pub mod llm_proxy;
pub mod paddleocr;
pub mod tesseract;

use apple_vision::AppleVisionProvider;
use easyocr::EasyOcrProvider;
use llm_proxy::LlmProxyProvider;
use paddleocr::PaddleOcrProvider;
use tesseract::TesseractProvider;

/// Text produced by a tier, pending validation.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Normalized candidate text.
    pub text: String,
    /// Engine-native confidence in `[0, 1]`, when the engine reports one.
    pub confidence: Option<f64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("engine invocation failed: {0}")]
    Engine(String),

    #[error("backend request failed: {0}")]
    Backend(#[from] reqwest::Error),

    #[error("backend returned an unusable response: {0}")]
    BadResponse(String),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Uniform capability over one OCR engine.
#[async_trait]
pub trait OcrProvider: Send + Sync {
    fn tier(&self) -> Tier;

    /// One-shot availability check at bootstrap.
    async fn probe(&self) -> bool;

    /// Extract candidate text from image bytes.
    async fn extract(&self, image: &[u8], language: &str) -> Result<Candidate, ProviderError>;
}

/// Active tier list plus driver handles, built once at startup.
pub struct ProviderRegistry {
    active: Vec<Arc<dyn OcrProvider>>,
}

impl ProviderRegistry {
    pub async fn bootstrap(config: &AppConfig) -> Result<Self, BootstrapError> {
        let enabled = config.enabled_tiers()?;

        let mut active: Vec<Arc<dyn OcrProvider>> = Vec::new();
        for tier in enabled {
            let provider: Arc<dyn OcrProvider> = match tier {
                Tier::Tesseract => Arc::new(TesseractProvider::new()),
                Tier::Easyocr => Arc::new(EasyOcrProvider::new()),
                Tier::Paddleocr => Arc::new(PaddleOcrProvider::new()),
                Tier::AppleVision => {
                    Arc::new(AppleVisionProvider::new(&config.ocr_apple_vision_helper))
                }
                Tier::LlmLocal => Arc::new(LlmProxyProvider::local(config)),
                Tier::LlmCloud => Arc::new(LlmProxyProvider::cloud(config)),
            };

            if provider.probe().await {
                tracing::info!(tier = %tier, "OCR tier available");
                active.push(provider);
            } else {
                tracing::warn!(tier = %tier, "OCR tier unavailable on this host, dropped");
            }
        }

        if active.is_empty() {
            return Err(BootstrapError::NoActiveTiers);
        }
        Ok(Self { active })
    }

    pub fn active_tiers(&self) -> Vec<Tier> {
        self.active.iter().map(|p| p.tier()).collect()
    }

    pub fn get(&self, tier: Tier) -> Option<Arc<dyn OcrProvider>> {
        self.active.iter().find(|p| p.tier() == tier).cloned()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    UnknownTier(#[from] UnknownTier),

    #[error("no enabled OCR tier is available on this host")]
    NoActiveTiers,
}

/// Write image bytes to a temp file for engines that only read paths.
pub(crate) fn spool_image(image: &[u8]) -> Result<NamedTempFile, ProviderError> {
    let file = NamedTempFile::new()?;
    std::fs::write(file.path(), image)?;
    Ok(file)
}

/// Run an engine subprocess, returning stdout or the stderr tail on failure.
pub(crate) async fn run_engine(mut command: Command) -> Result<String, ProviderError> {
    let output = command.output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProviderError::Engine(
            stderr.lines().last().unwrap_or("engine exited non-zero").to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Check that `binary` runs at all (used by probes).
pub(crate) async fn probe_binary(binary: &str, arg: &str) -> bool {
    Command::new(binary)
        .arg(arg)
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}
