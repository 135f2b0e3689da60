use async_trait::async_trait;

use crate::errors::BubbleResult;
use crate::llm::types::{CallConfig, ReasoningRequest};

/// Multimodal reasoning backend. Every adapter implements this trait and is
/// selected per provider entry in config.toml.
///
/// `generate` returns the raw response text; callers own parsing. Transient
/// transport failures are retried inside the adapter and surface as
/// `BubbleError::ReasoningUnavailable` once exhausted.
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    /// Returns the provider's identifier (matches config.toml key).
    fn name(&self) -> &str;

    async fn generate(&self, request: &ReasoningRequest, cfg: &CallConfig) -> BubbleResult<String>;
}
