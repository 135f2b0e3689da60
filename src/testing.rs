// Fakes shared by the unit tests.
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::{BubbleError, BubbleResult};
use crate::llm::provider::ReasoningProvider;
use crate::llm::types::{CallConfig, ReasoningRequest};
use crate::perception::screenshot::ScreenCapture;
use crate::perception::traits::ElementDetector;
use crate::perception::types::{BBox, PerceptionSnapshot, ScreenImage, UIElement};

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let frame = image::RgbImage::from_pixel(width, height, image::Rgb([240, 240, 240]));
    let mut buffer = std::io::Cursor::new(Vec::new());
    frame
        .write_to(&mut buffer, image::ImageFormat::Png)
        .unwrap();
    buffer.into_inner()
}

pub fn write_png(path: &Path, width: u32, height: u32) {
    std::fs::write(path, png_bytes(width, height)).unwrap();
}

pub fn png_image() -> ScreenImage {
    ScreenImage::from_encoded(png_bytes(64, 32)).unwrap()
}

/// A snapshot with a "Save" button as icon 3.
pub fn save_button_snapshot() -> PerceptionSnapshot {
    PerceptionSnapshot {
        image: png_image(),
        elements: vec![
            UIElement {
                id: 1,
                element_type: "text".into(),
                bbox: BBox::new(10.0, 10.0, 90.0, 24.0).unwrap(),
                content: Some("report.docx".into()),
                interactivity: Some(false),
            },
            UIElement {
                id: 3,
                element_type: "button".into(),
                bbox: BBox::new(100.0, 200.0, 140.0, 220.0).unwrap(),
                content: Some("Save".into()),
                interactivity: Some(true),
            },
        ],
    }
}

/// Replies from a fixed script and records every request it was sent.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<BubbleResult<String>>>,
    requests: Mutex<Vec<ReasoningRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<BubbleResult<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_config() -> CallConfig {
        CallConfig {
            model: "scripted".into(),
            temperature: 0.0,
        }
    }

    pub fn requests(&self) -> Vec<ReasoningRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &ReasoningRequest, _cfg: &CallConfig) -> BubbleResult<String> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BubbleError::InvalidResponse("script exhausted".into())))
    }
}

pub struct FakeDetector {
    outcome: Result<PerceptionSnapshot, fn() -> BubbleError>,
    calls: AtomicUsize,
}

impl FakeDetector {
    pub fn always(snapshot: PerceptionSnapshot) -> Self {
        Self {
            outcome: Ok(snapshot),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: fn() -> BubbleError) -> Self {
        Self {
            outcome: Err(error),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ElementDetector for FakeDetector {
    async fn detect(&self, _image: &ScreenImage) -> BubbleResult<PerceptionSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            Ok(snapshot) => Ok(snapshot.clone()),
            Err(make) => Err(make()),
        }
    }
}

/// Hands out the same image on every capture.
pub struct StaticCapture {
    image: ScreenImage,
}

impl StaticCapture {
    pub fn png() -> Self {
        Self { image: png_image() }
    }
}

#[async_trait]
impl ScreenCapture for StaticCapture {
    async fn capture(&self) -> BubbleResult<ScreenImage> {
        Ok(self.image.clone())
    }
}
