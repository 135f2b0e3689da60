use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::errors::{BubbleError, BubbleResult};

/// A captured (or backend-annotated) still image, always held as encoded bytes.
#[derive(Debug, Clone)]
pub struct ScreenImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

impl ScreenImage {
    /// Decode just enough to learn the format and dimensions.
    pub fn from_encoded(bytes: Vec<u8>) -> BubbleResult<Self> {
        let format = image::guess_format(&bytes)?;
        let decoded = image::load_from_memory_with_format(&bytes, format)?;
        Ok(Self {
            mime_type: format.to_mime_type().to_string(),
            width: decoded.width(),
            height: decoded.height(),
            bytes,
            captured_at: chrono::Utc::now(),
        })
    }

    pub fn from_base64(data: &str) -> BubbleResult<Self> {
        // Gradio sometimes hands back a data URI instead of bare base64.
        let payload = match data.split_once(";base64,") {
            Some((_, rest)) => rest,
            None => data,
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| BubbleError::PerceptionResponse(format!("image base64: {e}")))?;
        Self::from_encoded(bytes)
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }
}

/// `[x0, y0, x1, y1]` with `x0 < x1` and `y0 < y1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
}

impl BBox {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> BubbleResult<Self> {
        let coords = [x0, y0, x1, y1];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(BubbleError::InvalidResponse(format!(
                "bbox has non-finite coordinates: {coords:?}"
            )));
        }
        if x0 >= x1 || y0 >= y1 {
            return Err(BubbleError::InvalidResponse(format!(
                "degenerate bbox {coords:?}"
            )));
        }
        Ok(Self { x0, y0, x1, y1 })
    }

    pub fn from_slice(values: &[f64]) -> BubbleResult<Self> {
        match values {
            [x0, y0, x1, y1] => Self::new(*x0, *y0, *x1, *y1),
            other => Err(BubbleError::InvalidResponse(format!(
                "bbox must have 4 coordinates, got {}",
                other.len()
            ))),
        }
    }

    pub fn coords(&self) -> [f64; 4] {
        [self.x0, self.y0, self.x1, self.y1]
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    /// Scale ratio coordinates (0.0–1.0) into pixel space.
    pub fn scaled(&self, width: u32, height: u32) -> BubbleResult<Self> {
        let (w, h) = (width as f64, height as f64);
        Self::new(self.x0 * w, self.y0 * h, self.x1 * w, self.y1 * h)
    }

    /// Equal within `tolerance` on every coordinate.
    pub fn approx_eq(&self, other: &BBox, tolerance: f64) -> bool {
        self.coords()
            .iter()
            .zip(other.coords().iter())
            .all(|(a, b)| (a - b).abs() <= tolerance)
    }
}

impl TryFrom<[f64; 4]> for BBox {
    type Error = BubbleError;

    fn try_from(value: [f64; 4]) -> Result<Self, Self::Error> {
        Self::new(value[0], value[1], value[2], value[3])
    }
}

impl From<BBox> for [f64; 4] {
    fn from(value: BBox) -> Self {
        value.coords()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UIElement {
    /// Unique within one perception snapshot only.
    #[serde(rename = "icon")]
    pub id: u32,
    #[serde(rename = "type")]
    pub element_type: String,
    pub bbox: BBox,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interactivity: Option<bool>,
}

/// Output of one perception call.
#[derive(Debug, Clone)]
pub struct PerceptionSnapshot {
    /// Annotated image from the backend, or the original capture.
    pub image: ScreenImage,
    pub elements: Vec<UIElement>,
}

impl PerceptionSnapshot {
    pub fn element(&self, id: u32) -> Option<&UIElement> {
        self.elements.iter().find(|e| e.id == id)
    }

    /// Human-readable listing in the same `icon <id>: {...}` shape the backend uses.
    pub fn listing(&self) -> String {
        self.elements
            .iter()
            .map(|e| {
                let body = serde_json::json!({
                    "type": e.element_type,
                    "bbox": e.bbox.coords(),
                    "interactivity": e.interactivity,
                    "content": e.content,
                });
                format!("icon {}: {}", e.id, body)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
