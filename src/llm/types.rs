use serde::{Deserialize, Serialize};

use crate::perception::types::ScreenImage;

/// Image part of a reasoning request.
#[derive(Debug, Clone)]
pub struct InlineImage {
    pub mime_type: String,
    pub data_base64: String,
}

impl From<&ScreenImage> for InlineImage {
    fn from(image: &ScreenImage) -> Self {
        Self {
            mime_type: image.mime_type.clone(),
            data_base64: image.to_base64(),
        }
    }
}

/// One image + prompt round trip. The backend is asked for JSON text.
#[derive(Debug, Clone)]
pub struct ReasoningRequest {
    pub system_instruction: String,
    pub prompt: String,
    pub image: Option<InlineImage>,
}

/// Per-role call parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CallConfig {
    pub model: String,
    pub temperature: f64,
}

// ── OpenAI-compatible wire types ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

// ── Gemini generateContent wire types ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiRequest {
    pub system_instruction: GeminiContent,
    pub contents: Vec<GeminiContent>,
    pub safety_settings: Vec<SafetySetting>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GeminiPart {
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: Blob,
    },
    Text {
        text: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_mime_type: String,
    pub temperature: f64,
}

/// Copy of a request body with every base64 image replaced, for debug logging.
pub fn redact_images(body: &serde_json::Value) -> serde_json::Value {
    match body {
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, value) in map {
                let redacted = match (key.as_str(), value) {
                    ("data", serde_json::Value::String(_)) if map.contains_key("mimeType") => {
                        serde_json::Value::String("<omitted_base64_image>".into())
                    }
                    ("url", serde_json::Value::String(url)) if url.starts_with("data:") => {
                        serde_json::Value::String("<omitted_base64_image>".into())
                    }
                    _ => redact_images(value),
                };
                out.insert(key.clone(), redacted);
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(redact_images).collect())
        }
        other => other.clone(),
    }
}
