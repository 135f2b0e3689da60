use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::errors::{BubbleError, BubbleResult};
use crate::perception::types::ScreenImage;

/// Source of fresh screen images. Called once per iteration, never cached.
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    async fn capture(&self) -> BubbleResult<ScreenImage>;
}

/// Reads a screenshot someone else already wrote to disk.
pub struct FileCapture {
    path: PathBuf,
}

impl FileCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ScreenCapture for FileCapture {
    async fn capture(&self) -> BubbleResult<ScreenImage> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BubbleError::Capture(format!(
                    "screenshot file not found: {}",
                    self.path.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };
        let image = tokio::task::spawn_blocking(move || ScreenImage::from_encoded(bytes))
            .await
            .map_err(|e| BubbleError::Capture(format!("join: {e}")))??;
        tracing::debug!(
            path = %self.path.display(),
            width = image.width,
            height = image.height,
            "screenshot loaded"
        );
        Ok(image)
    }
}

/// Primary-monitor capture.
#[cfg(feature = "screen-capture")]
pub struct XcapCapture;

#[cfg(feature = "screen-capture")]
#[async_trait]
impl ScreenCapture for XcapCapture {
    async fn capture(&self) -> BubbleResult<ScreenImage> {
        tokio::task::spawn_blocking(|| {
            let monitors =
                xcap::Monitor::all().map_err(|e| BubbleError::Capture(e.to_string()))?;
            let monitor = monitors
                .first()
                .ok_or_else(|| BubbleError::Capture("no monitor found".into()))?;
            let frame = monitor
                .capture_image()
                .map_err(|e| BubbleError::Capture(e.to_string()))?;
            let (width, height) = (frame.width(), frame.height());
            let mut buffer = std::io::Cursor::new(Vec::new());
            frame
                .write_to(&mut buffer, xcap::image::ImageFormat::Png)
                .map_err(|e| BubbleError::Capture(e.to_string()))?;
            Ok(ScreenImage {
                bytes: buffer.into_inner(),
                mime_type: "image/png".into(),
                width,
                height,
                captured_at: chrono::Utc::now(),
            })
        })
        .await
        .map_err(|e| BubbleError::Capture(format!("join: {e}")))?
    }
}
