use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Semaphore;

use crate::models::tier::Tier;
use crate::services::text;

use super::{probe_binary, run_engine, spool_image, Candidate, OcrProvider, ProviderError};

/// Concurrent engine invocations per process; excess callers queue here.
const MAX_CONCURRENT: usize = 2;

/// Driver for the Tesseract CLI.
pub struct TesseractProvider {
    gate: Semaphore,
}

impl TesseractProvider {
    pub fn new() -> Self {
        Self {
            gate: Semaphore::new(MAX_CONCURRENT),
        }
    }
}

impl Default for TesseractProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Map an ISO-639-1 hint to Tesseract's three-letter traineddata codes.
fn tesseract_language(hint: &str) -> &str {
    match hint {
        "en" => "eng",
        "fr" => "fra",
        "de" => "deu",
        "es" => "spa",
        "it" => "ita",
        "pt" => "por",
        "nl" => "nld",
        other => other,
    }
}

#[async_trait]
impl OcrProvider for TesseractProvider {
    fn tier(&self) -> Tier {
        Tier::Tesseract
    }

    async fn probe(&self) -> bool {
        probe_binary("tesseract", "--version").await
    }

    async fn extract(&self, image: &[u8], language: &str) -> Result<Candidate, ProviderError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| ProviderError::Engine("engine gate closed".to_string()))?;

        let spooled = spool_image(image)?;
        let mut command = Command::new("tesseract");
        command
            .arg(spooled.path())
            .arg("stdout")
            .arg("-l")
            .arg(tesseract_language(language));

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

    #[test]
    fn maps_common_language_hints() {
        assert_eq!(tesseract_language("en"), "eng");
        assert_eq!(tesseract_language("de"), "deu");
        // unknown hints pass through for custom traineddata
        assert_eq!(tesseract_language("jpn"), "jpn");
    }
}
