/// OmniParser client over the Gradio call API.
///
/// `POST {endpoint}{call_prefix}/{api_name}` queues a job and returns an
/// `event_id`; `GET .../{event_id}` streams SSE until a `complete` event whose
/// payload is `[annotated_image, element_listing]`.
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::config::{BboxSpace, PerceptionConfig};
use crate::errors::{BubbleError, BubbleResult};
use crate::perception::element_parser::parse_listing;
use crate::perception::gradio_sse;
use crate::perception::traits::ElementDetector;
use crate::perception::types::{PerceptionSnapshot, ScreenImage, UIElement};
use crate::retry::RetryPolicy;

pub struct OmniParserClient {
    client: reqwest::Client,
    config: PerceptionConfig,
    token: Option<String>,
    retry: RetryPolicy,
}

impl OmniParserClient {
    pub fn new(
        config: PerceptionConfig,
        token: Option<String>,
        retry: RetryPolicy,
    ) -> BubbleResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        tracing::info!(
            endpoint = %config.endpoint,
            api = %config.api_name,
            max_attempts = retry.max_attempts,
            "perception client ready"
        );
        Ok(Self {
            client,
            config,
            token,
            retry,
        })
    }

    fn call_url(&self) -> String {
        format!(
            "{}{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.call_prefix.trim_end_matches('/'),
            self.config.api_name.trim_start_matches('/'),
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// One full queue + poll round trip. Returns the `complete` payload.
    async fn call_once(&self, image_b64: &str) -> BubbleResult<serde_json::Value> {
        let url = self.call_url();
        let body = serde_json::json!({
            "data": [
                image_b64,
                self.config.box_threshold,
                self.config.iou_threshold,
                self.config.use_ocr,
                self.config.imgsz,
            ]
        });

        let response = self.authorize(self.client.post(&url)).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BubbleError::BackendStatus {
                service: "perception",
                status,
                body,
            });
        }
        let queued: serde_json::Value = response.json().await?;
        let event_id = queued["event_id"].as_str().ok_or_else(|| {
            BubbleError::PerceptionResponse(format!("no event_id in queue response: {queued}"))
        })?;
        tracing::debug!(event_id, "perception job queued");

        let response = self
            .authorize(self.client.get(format!("{url}/{event_id}")))
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BubbleError::BackendStatus {
                service: "perception",
                status,
                body,
            });
        }
        let text = response.text().await?;
        gradio_sse::completion(gradio_sse::parse_events(&text)?)
    }

    /// Turn the first output slot into an image; falls back to the original capture.
    async fn resolve_image(&self, slot: &serde_json::Value, original: &ScreenImage) -> ScreenImage {
        let decoded = match slot {
            serde_json::Value::String(data) => ScreenImage::from_base64(data),
            serde_json::Value::Object(file) => match file.get("url").and_then(|u| u.as_str()) {
                Some(url) => self.fetch_image(url).await,
                None => Err(BubbleError::PerceptionResponse("image object without url".into())),
            },
            _ => Err(BubbleError::PerceptionResponse("no image in response".into())),
        };
        match decoded {
            Ok(image) => image,
            Err(e) => {
                tracing::debug!(error = %e, "using original capture for grounding");
                original.clone()
            }
        }
    }

    async fn fetch_image(&self, url: &str) -> BubbleResult<ScreenImage> {
        let response = self.authorize(self.client.get(url)).send().await?;
        if !response.status().is_success() {
            return Err(BubbleError::PerceptionResponse(format!(
                "image download returned {}",
                response.status()
            )));
        }
        let bytes = response.bytes().await?;
        ScreenImage::from_encoded(bytes.to_vec())
    }

    fn to_pixel_space(&self, elements: Vec<UIElement>, original: &ScreenImage) -> Vec<UIElement> {
        if self.config.bbox_space == BboxSpace::Pixel {
            return elements;
        }
        elements
            .into_iter()
            .filter_map(|mut element| {
                match element.bbox.scaled(original.width, original.height) {
                    Ok(bbox) => {
                        element.bbox = bbox;
                        Some(element)
                    }
                    Err(e) => {
                        tracing::warn!(id = element.id, error = %e, "dropping element after scaling");
                        None
                    }
                }
            })
            .collect()
    }
}

#[async_trait]
impl ElementDetector for OmniParserClient {
    async fn detect(&self, image: &ScreenImage) -> BubbleResult<PerceptionSnapshot> {
        let started = Instant::now();
        let image_b64 = image.to_base64();
        let encoded = image_b64.as_str();
        let this = self;

        let payload = self
            .retry
            .run(
                "perception",
                |e| e.is_transient() || matches!(e, BubbleError::PerceptionResponse(_)),
                move |attempt| {
                    tracing::debug!(attempt, "calling perception backend");
                    this.call_once(encoded)
                },
            )
            .await
            .map_err(|exhausted| {
                tracing::error!(
                    attempts = exhausted.attempts,
                    error = %exhausted.error,
                    "perception backend unavailable"
                );
                BubbleError::PerceptionUnavailable {
                    attempts: exhausted.attempts,
                    last_error: exhausted.error.to_string(),
                }
            })?;

        let listing = payload
            .get(1)
            .and_then(|v| v.as_str())
            .ok_or_else(|| BubbleError::PerceptionUnavailable {
                attempts: 1,
                last_error: "complete payload has no element listing".into(),
            })?;
        let elements = self.to_pixel_space(parse_listing(listing), image);
        let annotated = self
            .resolve_image(payload.get(0).unwrap_or(&serde_json::Value::Null), image)
            .await;

        tracing::info!(
            elements = elements.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "perception complete"
        );
        Ok(PerceptionSnapshot {
            image: annotated,
            elements,
        })
    }
}
