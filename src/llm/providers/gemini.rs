use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::config::SafetyConfig;
use crate::errors::{BubbleError, BubbleResult};
use crate::llm::provider::ReasoningProvider;
use crate::llm::types::{
    redact_images, Blob, CallConfig, GeminiContent, GeminiPart, GeminiRequest, GenerationConfig,
    ReasoningRequest, SafetySetting,
};
use crate::retry::RetryPolicy;

/// Google Gemini `generateContent` adapter. Requests JSON output
/// (`responseMimeType = application/json`) and forwards the configured
/// content-safety thresholds.
pub struct GeminiProvider {
    id: String,
    api_base: String,
    api_key: String,
    safety: SafetyConfig,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(
        id: String,
        api_base: String,
        api_key: String,
        safety: SafetyConfig,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> BubbleResult<Self> {
        if api_key.trim().is_empty() {
            return Err(BubbleError::Config(format!("provider '{id}' has no API key")));
        }
        Ok(Self {
            id,
            api_base,
            api_key,
            safety,
            retry,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn build_body(&self, request: &ReasoningRequest, cfg: &CallConfig) -> GeminiRequest {
        let mut parts = Vec::new();
        if let Some(image) = &request.image {
            parts.push(GeminiPart::InlineData {
                inline_data: Blob {
                    mime_type: image.mime_type.clone(),
                    data: image.data_base64.clone(),
                },
            });
        }
        parts.push(GeminiPart::Text {
            text: request.prompt.clone(),
        });

        GeminiRequest {
            system_instruction: GeminiContent {
                role: None,
                parts: vec![GeminiPart::Text {
                    text: request.system_instruction.clone(),
                }],
            },
            contents: vec![GeminiContent {
                role: Some("user".into()),
                parts,
            }],
            safety_settings: self
                .safety
                .categories
                .iter()
                .map(|category| SafetySetting {
                    category: category.clone(),
                    threshold: self.safety.threshold.clone(),
                })
                .collect(),
            generation_config: GenerationConfig {
                response_mime_type: "application/json".into(),
                temperature: cfg.temperature,
            },
        }
    }

    async fn call_once(&self, body: &serde_json::Value, model: &str) -> BubbleResult<String> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.api_base.trim_end_matches('/'),
            model
        );
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BubbleError::BackendStatus {
                service: "gemini",
                status,
                body,
            });
        }
        let json: serde_json::Value = response.json().await?;
        extract_text(&json)
    }
}

/// Concatenate the text parts of the first candidate.
pub fn extract_text(json: &serde_json::Value) -> BubbleResult<String> {
    let Some(candidate) = json["candidates"].as_array().and_then(|c| c.first()) else {
        let reason = json["promptFeedback"]["blockReason"]
            .as_str()
            .unwrap_or("no candidates");
        return Err(BubbleError::InvalidResponse(format!("gemini returned no candidate: {reason}")));
    };
    let text: String = candidate["content"]["parts"]
        .as_array()
        .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        let finish = candidate["finishReason"].as_str().unwrap_or("unknown");
        return Err(BubbleError::InvalidResponse(format!(
            "gemini candidate has no text (finishReason: {finish})"
        )));
    }
    Ok(text)
}

#[async_trait]
impl ReasoningProvider for GeminiProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn generate(&self, request: &ReasoningRequest, cfg: &CallConfig) -> BubbleResult<String> {
        let body = serde_json::to_value(self.build_body(request, cfg))?;
        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            body = %redact_images(&body),
            "sending gemini request"
        );

        let started = Instant::now();
        let this = self;
        let body_ref = &body;
        let model = cfg.model.as_str();
        let text = self
            .retry
            .run("gemini", BubbleError::is_transient, move |_| {
                this.call_once(body_ref, model)
            })
            .await
            .map_err(|exhausted| {
                if exhausted.error.is_transient() {
                    BubbleError::ReasoningUnavailable {
                        attempts: exhausted.attempts,
                        last_error: exhausted.error.to_string(),
                    }
                } else {
                    exhausted.error
                }
            })?;

        tracing::info!(
            provider = %self.id,
            model = %cfg.model,
            content_len = text.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "gemini response received"
        );
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::InlineImage;

    fn provider() -> GeminiProvider {
        GeminiProvider::new(
            "gemini".into(),
            "https://example.invalid/v1beta".into(),
            "key".into(),
            SafetyConfig::default(),
            RetryPolicy::immediate(1),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_body_carries_contract() {
        let request = ReasoningRequest {
            system_instruction: "be precise".into(),
            prompt: "User goal: save".into(),
            image: Some(InlineImage {
                mime_type: "image/png".into(),
                data_base64: "AAAA".into(),
            }),
        };
        let cfg = CallConfig {
            model: "gemini-2.5-flash".into(),
            temperature: 0.2,
        };
        let body = serde_json::to_value(provider().build_body(&request, &cfg)).unwrap();
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["safetySettings"].as_array().unwrap().len(), 4);
        assert_eq!(body["safetySettings"][0]["threshold"], "BLOCK_ONLY_HIGH");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be precise");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["inlineData"]["data"], "AAAA");
        assert_eq!(body["contents"][0]["parts"][1]["text"], "User goal: save");
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let err = GeminiProvider::new(
            "gemini".into(),
            "https://example.invalid".into(),
            " ".into(),
            SafetyConfig::default(),
            RetryPolicy::default(),
            Duration::from_secs(5),
        )
        .err()
        .unwrap();
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn test_extract_text() {
        let ok = serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "{\"done\":"}, {"text": " true}"}]}}]
        });
        assert_eq!(extract_text(&ok).unwrap(), "{\"done\": true}");

        let blocked = serde_json::json!({"promptFeedback": {"blockReason": "SAFETY"}});
        assert!(extract_text(&blocked).unwrap_err().to_string().contains("SAFETY"));

        let empty = serde_json::json!({"candidates": [{"finishReason": "MAX_TOKENS"}]});
        assert!(extract_text(&empty).unwrap_err().to_string().contains("MAX_TOKENS"));
    }
}
