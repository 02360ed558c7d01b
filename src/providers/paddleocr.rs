use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Semaphore;

use crate::models::tier::Tier;
use crate::services::text;

use super::{probe_binary, run_engine, spool_image, Candidate, OcrProvider, ProviderError};

const MAX_CONCURRENT: usize = 2;

/// Driver for the PaddleOCR CLI.
///
/// Result lines look like `[[box coords], ('TEXT', 0.9533)]` interleaved
/// with logging noise; only the tuple part is of interest here.
pub struct PaddleOcrProvider {
    gate: Semaphore,
}

impl PaddleOcrProvider {
    pub fn new() -> Self {
        Self {
            gate: Semaphore::new(MAX_CONCURRENT),
        }
    }
}

impl Default for PaddleOcrProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull `(text, confidence)` out of one PaddleOCR result line.
fn parse_result_line(line: &str) -> Option<(String, f64)> {
    let start = line.find("('")? + 2;
    let sep = line[start..].rfind("', ")? + start;
    let fragment = &line[start..sep];

    let rest = &line[sep + 3..];
    let close = rest.find(')')?;
    let confidence: f64 = rest[..close].trim().parse().ok()?;

    Some((fragment.to_string(), confidence))
}

#[async_trait]
impl OcrProvider for PaddleOcrProvider {
    fn tier(&self) -> Tier {
        Tier::Paddleocr
    }

    async fn probe(&self) -> bool {
        probe_binary("paddleocr", "--help").await
    }

    async fn extract(&self, image: &[u8], language: &str) -> Result<Candidate, ProviderError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| ProviderError::Engine("engine gate closed".to_string()))?;

        let spooled = spool_image(image)?;
        let mut command = Command::new("paddleocr");
        command
            .arg("--image_dir")
            .arg(spooled.path())
            .arg("--lang")
            .arg(language)
            .arg("--use_angle_cls")
            .arg("true");

        let stdout = run_engine(command).await?;

        let mut fragments = Vec::new();
        let mut confidences = Vec::new();
        for line in stdout.lines() {
            if let Some((fragment, confidence)) = parse_result_line(line) {
                fragments.push(fragment);
                confidences.push(confidence);
            }
        }

        let confidence = if confidences.is_empty() {
            None
        } else {
            let mean = confidences.iter().sum::<f64>() / confidences.len() as f64;
            Some(text::clamp_confidence(mean))
        };

        Ok(Candidate {
            text: text::normalize(&fragments.join("\n")),
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_result_tuple() {
        let line = "[[[28.0, 37.0], [302.0, 39.0]], ('PAIN AU LEVAIN', 0.9533)]";
        let (fragment, confidence) = parse_result_line(line).unwrap();
        assert_eq!(fragment, "PAIN AU LEVAIN");
        assert!((confidence - 0.9533).abs() < 1e-9);
    }

    #[test]
    fn parses_fragment_containing_quotes() {
        let line = "[[...], (\"chef's 'special', daily\", 0.81)]";
        // no ('…', …) tuple form here, so nothing is extracted
        assert!(parse_result_line(line).is_none());

        let line = "[[...], ('chef''s special', 0.81)]";
        let (fragment, confidence) = parse_result_line(line).unwrap();
        assert_eq!(fragment, "chef''s special");
        assert!((confidence - 0.81).abs() < 1e-9);
    }

    #[test]
    fn ignores_log_noise() {
        assert!(parse_result_line("[2026/08/02 10:00:01] ppocr INFO: loading model").is_none());
        assert!(parse_result_line("").is_none());
    }
}
