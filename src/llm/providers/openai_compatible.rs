use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::errors::{BubbleError, BubbleResult};
use crate::llm::provider::ReasoningProvider;
use crate::llm::types::{
    redact_images, CallConfig, ChatMessage, ContentPart, ImageUrl, MessageContent,
    ReasoningRequest,
};
use crate::retry::RetryPolicy;

/// Chat-completions adapter for OpenAI-compatible endpoints.
/// `api_base` is the full completions URL.
pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        id: String,
        api_base: String,
        api_key: String,
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
            retry,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn build_body(&self, request: &ReasoningRequest, cfg: &CallConfig) -> serde_json::Value {
        let mut parts = Vec::new();
        if let Some(image) = &request.image {
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:{};base64,{}", image.mime_type, image.data_base64),
                },
            });
        }
        parts.push(ContentPart::Text {
            text: request.prompt.clone(),
        });

        let messages = vec![
            ChatMessage {
                role: "system".into(),
                content: MessageContent::Text(request.system_instruction.clone()),
            },
            ChatMessage {
                role: "user".into(),
                content: MessageContent::Parts(parts),
            },
        ];

        serde_json::json!({
            "model": cfg.model,
            "messages": messages,
            "stream": false,
            "temperature": cfg.temperature,
            "response_format": { "type": "json_object" },
        })
    }

    async fn call_once(&self, body: &serde_json::Value) -> BubbleResult<String> {
        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BubbleError::BackendStatus {
                service: "openai",
                status,
                body,
            });
        }

        let json: serde_json::Value = response.json().await?;
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        if content.trim().is_empty() {
            return Err(BubbleError::InvalidResponse(
                "completion has no message content".into(),
            ));
        }
        Ok(content)
    }
}

#[async_trait]
impl ReasoningProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn generate(&self, request: &ReasoningRequest, cfg: &CallConfig) -> BubbleResult<String> {
        let body = self.build_body(request, cfg);
        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            body = %redact_images(&body),
            "sending LLM request"
        );

        let started = Instant::now();
        let this = self;
        let body_ref = &body;
        let content = self
            .retry
            .run("openai", BubbleError::is_transient, move |_| this.call_once(body_ref))
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
            content_len = content.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "LLM JSON response received"
        );
        Ok(content)
    }
}
