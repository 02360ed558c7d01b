use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::AppConfig;
use crate::models::tier::Tier;
use crate::services::text;

use super::{Candidate, OcrProvider, ProviderError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const OCR_PROMPT: &str = concat!(
    "OCR this image and extract all text. Return the result as JSON in this exact format:\n",
    "{\n  \"page1\": {\n    \"text\": \"extracted text here\"\n  }\n}\n\n",
    "The text field should contain all readable text from the image. ",
    "If the image contains no text, return an empty string."
);

/// Driver for LLM-backed OCR via the proxy's OpenAI-compatible chat API.
/// One instance per proxy model: `vision` for the local tier, `cloud` for
/// the cloud tier.
pub struct LlmProxyProvider {
    tier: Tier,
    model: &'static str,
    http: Client,
    completions_url: String,
    app_id: String,
    app_key: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl LlmProxyProvider {
    pub fn local(config: &AppConfig) -> Self {
        Self::with_model(config, Tier::LlmLocal, "vision")
    }

    pub fn cloud(config: &AppConfig) -> Self {
        Self::with_model(config, Tier::LlmCloud, "cloud")
    }

    fn with_model(config: &AppConfig, tier: Tier, model: &'static str) -> Self {
        Self {
            tier,
            model,
            http: Client::new(),
            completions_url: format!(
                "{}/v1/chat/completions",
                config.llm_proxy_url.trim_end_matches('/')
            ),
            app_id: config.llm_proxy_app_id.clone(),
            app_key: config.llm_proxy_app_key.clone(),
        }
    }
}

/// Pull the recognized text out of the model's JSON reply, falling back to
/// the raw content when the model ignored the response format.
fn extract_page_text(content: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(content) {
        Ok(value) => value
            .get("page1")
            .and_then(|page| page.get("text"))
            .and_then(|text| text.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| content.to_string()),
        Err(_) => content.to_string(),
    }
}

#[async_trait]
impl OcrProvider for LlmProxyProvider {
    fn tier(&self) -> Tier {
        self.tier
    }

    async fn probe(&self) -> bool {
        // The driver exists whenever credentials are configured;
        // reachability failures surface later as per-tier errors.
        !self.app_id.is_empty() && !self.app_key.is_empty()
    }

    async fn extract(&self, image: &[u8], language: &str) -> Result<Candidate, ProviderError> {
        let media_type = image::guess_format(image)
            .map(|format| format.to_mime_type())
            .unwrap_or("image/png");
        let data_uri = format!(
            "data:{media_type};base64,{}",
            base64::engine::general_purpose::STANDARD.encode(image)
        );

        let prompt = format!("{OCR_PROMPT} The text may be in: {language}.");
        let request_body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": prompt},
                    {"type": "image_url", "image_url": {"url": data_uri}}
                ]
            }],
            "response_format": {"type": "json_object"},
            "max_tokens": 4096
        });

        let response = self
            .http
            .post(&self.completions_url)
            .timeout(REQUEST_TIMEOUT)
            .header("X-Jarvis-App-Id", &self.app_id)
            .header("X-Jarvis-App-Key", &self.app_key)
            .json(&request_body)
            .send()
            .await
            .map_err(ProviderError::Backend)?;

        if !response.status().is_success() {
            return Err(ProviderError::BadResponse(format!(
                "proxy returned {}",
                response.status()
            )));
        }

        let chat: ChatResponse = response.json().await.map_err(ProviderError::Backend)?;
        let content = chat
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .ok_or_else(|| ProviderError::BadResponse("no choices in proxy reply".to_string()))?;

        Ok(Candidate {
            text: text::normalize(&extract_page_text(content)),
            confidence: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_page_text_from_json_reply() {
        let content = r#"{"page1": {"text": "Recipe: Toast"}}"#;
        assert_eq!(extract_page_text(content), "Recipe: Toast");
    }

    #[test]
    fn falls_back_to_raw_content() {
        assert_eq!(extract_page_text("plain words"), "plain words");
        assert_eq!(extract_page_text(r#"{"pages": []}"#), r#"{"pages": []}"#);
    }
}
