use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Semaphore;

use crate::models::tier::Tier;
use crate::services::text;

use super::{probe_binary, run_engine, spool_image, Candidate, OcrProvider, ProviderError};

const MAX_CONCURRENT: usize = 2;

/// Driver for the EasyOCR CLI. Runs with `--detail 0` so stdout is plain
/// recognized text, one fragment per line.
pub struct EasyOcrProvider {
    gate: Semaphore,
}

impl EasyOcrProvider {
    pub fn new() -> Self {
        Self {
            gate: Semaphore::new(MAX_CONCURRENT),
        }
    }
}

impl Default for EasyOcrProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OcrProvider for EasyOcrProvider {
    fn tier(&self) -> Tier {
        Tier::Easyocr
    }

    async fn probe(&self) -> bool {
        probe_binary("easyocr", "--help").await
    }

    async fn extract(&self, image: &[u8], language: &str) -> Result<Candidate, ProviderError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| ProviderError::Engine("engine gate closed".to_string()))?;

        let spooled = spool_image(image)?;
        let mut command = Command::new("easyocr");
        command
            .arg("-l")
            .arg(language)
            .arg("-f")
            .arg(spooled.path())
            .arg("--detail")
            .arg("0")
            .arg("--paragraph")
            .arg("True");

        let stdout = run_engine(command).await?;
        Ok(Candidate {
            text: text::normalize(&stdout),
            confidence: None,
        })
    }
}
