use std::sync::Arc;

use crate::agent_engine::state::GroundingResult;
use crate::errors::{BubbleError, BubbleResult};
use crate::llm::provider::ReasoningProvider;
use crate::llm::response::{excerpt, parse_json_object};
use crate::llm::types::{CallConfig, InlineImage, ReasoningRequest};
use crate::perception::types::{BBox, PerceptionSnapshot};
use crate::retry::RetryPolicy;

const SYSTEM_PROMPT: &str = "\
You map one atomic UI action onto exactly one detected screen element.

You receive the action, a screenshot in which detected elements are outlined and numbered, and \
the list of detected elements with their icon id, type, bounding box [x0, y0, x1, y1] in image \
pixels, and text content.

Pick the single element the action should be performed on. Only choose elements inside open \
application windows, never the taskbar or system tray.

Answer with one JSON object only:
{\"icon\": <icon id from the list>, \"bbox\": [x0, y0, x1, y1], \"reason\": <why this element>, \
\"action\": <the action restated for this element>}";

/// Selects one element from a perception snapshot for a natural-language action.
#[derive(Clone)]
pub struct ElementGrounder {
    provider: Arc<dyn ReasoningProvider>,
    cfg: CallConfig,
    attempts: u32,
}

impl ElementGrounder {
    pub fn new(provider: Arc<dyn ReasoningProvider>, cfg: CallConfig, attempts: u32) -> Self {
        Self {
            provider,
            cfg,
            attempts: attempts.max(1),
        }
    }

    /// Ground `action` against `snapshot`.
    ///
    /// Shape and semantic violations are retried with a fresh call up to the
    /// configured bound and then reported as `GroundingFailed`. Backend
    /// unavailability is returned as-is.
    pub async fn ground(&self, action: &str, snapshot: &PerceptionSnapshot) -> BubbleResult<GroundingResult> {
        if snapshot.elements.is_empty() {
            return Err(BubbleError::EmptyElements);
        }

        let request = ReasoningRequest {
            system_instruction: SYSTEM_PROMPT.to_string(),
            prompt: build_prompt(action, snapshot)?,
            image: Some(InlineImage::from(&snapshot.image)),
        };

        let policy = RetryPolicy::immediate(self.attempts);
        let this = self;
        let request = &request;
        let outcome = policy
            .run(
                "grounding",
                |e| matches!(e, BubbleError::InvalidResponse(_)),
                move |attempt| async move {
                    let raw = this.provider.generate(request, &this.cfg).await?;
                    validate_grounding(&raw, snapshot).inspect_err(|e| {
                        tracing::warn!(attempt, error = %e, "grounding response rejected");
                    })
                },
            )
            .await;

        match outcome {
            Ok(result) => {
                tracing::info!(icon = result.icon_id, bbox = ?result.bbox.coords(), "element grounded");
                Ok(result)
            }
            Err(exhausted) => match exhausted.error {
                BubbleError::InvalidResponse(last_error) => Err(BubbleError::GroundingFailed {
                    attempts: exhausted.attempts,
                    last_error,
                }),
                other => Err(other),
            },
        }
    }
}

pub fn build_prompt(action: &str, snapshot: &PerceptionSnapshot) -> BubbleResult<String> {
    Ok(format!(
        "User task: {action}\n\nUI elements:\n{}",
        serde_json::to_string_pretty(&snapshot.elements)?
    ))
}

/// Check a raw reply against `{"icon", "bbox", "reason", "action"}` and the
/// element set it was asked about.
pub fn validate_grounding(raw: &str, snapshot: &PerceptionSnapshot) -> BubbleResult<GroundingResult> {
    let fail = |why: String| BubbleError::InvalidResponse(format!("{why}; raw: {}", excerpt(raw)));

    let map = parse_json_object(raw).map_err(|e| fail(e.to_string()))?;

    let icon_id = map
        .get("icon")
        .and_then(serde_json::Value::as_u64)
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| fail("'icon' must be a non-negative integer".into()))?;
    if snapshot.element(icon_id).is_none() {
        return Err(fail(format!("icon {icon_id} is not in the offered element set")));
    }

    let coords: Vec<f64> = map
        .get("bbox")
        .and_then(serde_json::Value::as_array)
        .filter(|values| values.len() == 4)
        .ok_or_else(|| fail("'bbox' must be a list of 4 numbers".into()))?
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| fail(format!("'bbox' holds a non-numeric value {v}")))
        })
        .collect::<BubbleResult<_>>()?;
    let bbox = BBox::from_slice(&coords).map_err(|e| fail(e.to_string()))?;

    let text_field = |name: &str| {
        map.get(name)
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| fail(format!("'{name}' must be a non-empty string")))
    };
    let reason = text_field("reason")?;
    let action = text_field("action")?;

    Ok(GroundingResult {
        icon_id,
        bbox,
        reason,
        action,
    })
}
