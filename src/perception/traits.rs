use async_trait::async_trait;

use crate::errors::BubbleResult;
use crate::perception::types::{PerceptionSnapshot, ScreenImage};

/// Strategy trait for UI element detection.
///
/// Implementations must not alter `image`; on retry exhaustion they return
/// `BubbleError::PerceptionUnavailable` rather than a placeholder listing.
#[async_trait]
pub trait ElementDetector: Send + Sync {
    async fn detect(&self, image: &ScreenImage) -> BubbleResult<PerceptionSnapshot>;
}
