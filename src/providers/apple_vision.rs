use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Semaphore;

use crate::models::tier::Tier;
use crate::services::text;

use super::{probe_binary, run_engine, spool_image, Candidate, OcrProvider, ProviderError};

const MAX_CONCURRENT: usize = 2;

/// Driver for the Vision-framework helper on macOS hosts.
///
/// The helper is a small Swift binary that prints recognized text to
/// stdout. On any other OS the probe fails and the tier is silently
/// dropped from the cascade.
pub struct AppleVisionProvider {
    helper: String,
    gate: Semaphore,
}

impl AppleVisionProvider {
    pub fn new(helper: &str) -> Self {
        Self {
            helper: helper.to_string(),
            gate: Semaphore::new(MAX_CONCURRENT),
        }
    }
}

#[async_trait]
impl OcrProvider for AppleVisionProvider {
    fn tier(&self) -> Tier {
        Tier::AppleVision
    }

    async fn probe(&self) -> bool {
        if !cfg!(target_os = "macos") {
            return false;
        }
        probe_binary(&self.helper, "--version").await
    }

    async fn extract(&self, image: &[u8], language: &str) -> Result<Candidate, ProviderError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| ProviderError::Engine("engine gate closed".to_string()))?;

        let spooled = spool_image(image)?;
        let mut command = Command::new(&self.helper);
        command
            .arg("--language")
            .arg(language)
            .arg(spooled.path());

        let stdout = run_engine(command).await?;
        Ok(Candidate {
            text: text::normalize(&stdout),
            confidence: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_os = "macos"))]
    #[tokio::test]
    async fn probe_fails_off_macos() {
        let provider = AppleVisionProvider::new("ocr-vision-helper");
        assert!(!provider.probe().await);
    }
}
