use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{BubbleError, BubbleResult};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub llm: LlmConfig,
    #[serde(default)]
    pub perception: PerceptionConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    pub active_provider: String,
    pub providers: HashMap<String, ProviderEntry>,
    /// Role-to-model mapping. If a role is absent, falls back to active_provider defaults.
    #[serde(default)]
    pub roles: RolesConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    pub api_base: String,
    /// Default model for this provider (used as fallback when no role config exists).
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub adapter: AdapterKind,
    /// Optional API key stored in config.toml (env var BUBBLE_<ID>_API_KEY wins).
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    #[default]
    Gemini,
    Openai,
}

/// Maps loop roles to specific provider+model combinations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolesConfig {
    /// Next-action proposal against goal + history + screen.
    pub proposer: Option<RoleEntry>,
    /// Maps one action onto one detected element.
    pub grounder: Option<RoleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Must match a key under [llm.providers.*].
    pub provider: String,
    /// Model name sent to the API.
    pub model: String,
    /// Overrides the provider-level temperature for this role.
    pub temperature: Option<f64>,
}

/// Content-safety thresholds forwarded to backends that support them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_harm_threshold")]
    pub threshold: String,
    #[serde(default = "default_harm_categories")]
    pub categories: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            threshold: default_harm_threshold(),
            categories: default_harm_categories(),
        }
    }
}

fn default_harm_threshold() -> String {
    "BLOCK_ONLY_HIGH".into()
}

fn default_harm_categories() -> Vec<String> {
    [
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_temperature() -> f64 {
    0.1
}

fn default_request_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptionConfig {
    #[serde(default = "default_perception_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_api_name")]
    pub api_name: String,
    /// Path segment in front of the api name; `/call` on older Gradio releases.
    #[serde(default = "default_call_prefix")]
    pub call_prefix: String,
    #[serde(default = "default_box_threshold")]
    pub box_threshold: f64,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f64,
    #[serde(default = "default_true")]
    pub use_ocr: bool,
    #[serde(default = "default_imgsz")]
    pub imgsz: u32,
    #[serde(default)]
    pub bbox_space: BboxSpace,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
    /// Optional bearer token for hosted Spaces (env HF_TOKEN also honoured).
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_perception_endpoint(),
            api_name: default_api_name(),
            call_prefix: default_call_prefix(),
            box_threshold: default_box_threshold(),
            iou_threshold: default_iou_threshold(),
            use_ocr: true,
            imgsz: default_imgsz(),
            bbox_space: BboxSpace::default(),
            timeout_secs: default_request_timeout(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BboxSpace {
    /// Coordinates in 0.0–1.0, scaled by the captured image size.
    #[default]
    Ratio,
    Pixel,
}

fn default_perception_endpoint() -> String {
    "http://127.0.0.1:7860".into()
}

fn default_api_name() -> String {
    "process".into()
}

fn default_call_prefix() -> String {
    "/gradio_api/call".into()
}

fn default_box_threshold() -> f64 {
    0.05
}

fn default_iou_threshold() -> f64 {
    0.1
}

fn default_imgsz() -> u32 {
    640
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Independent grounding calls allowed for malformed responses.
    #[serde(default = "default_grounding_attempts")]
    pub grounding_attempts: u32,
    #[serde(default)]
    pub on_proposal_error: ProposalErrorPolicy,
    /// 0 disables the limit.
    #[serde(default)]
    pub max_duration_minutes: u32,
    /// 0 disables the limit.
    #[serde(default)]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_max_repeated_failures")]
    pub max_repeated_failures: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            grounding_attempts: default_grounding_attempts(),
            on_proposal_error: ProposalErrorPolicy::default(),
            max_duration_minutes: 0,
            max_consecutive_failures: 0,
            max_repeated_failures: default_max_repeated_failures(),
        }
    }
}

fn default_grounding_attempts() -> u32 {
    2
}

fn default_max_repeated_failures() -> u32 {
    3
}

/// What a malformed proposal does to the session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProposalErrorPolicy {
    /// Report the error and wait for the next trigger.
    #[default]
    AwaitTrigger,
    /// End the session.
    Terminate,
}

impl AppConfig {
    /// Resolve the API key for a provider id: env, then config, then GEMINI_API_KEY
    /// for Gemini-adapter providers.
    pub fn api_key_for(&self, id: &str) -> Option<String> {
        let entry = self.llm.providers.get(id)?;
        std::env::var(format!("BUBBLE_{}_API_KEY", id.to_uppercase()))
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| entry.api_key.clone().filter(|k| !k.trim().is_empty()))
            .or_else(|| {
                if entry.adapter == AdapterKind::Gemini {
                    std::env::var("GEMINI_API_KEY")
                        .ok()
                        .filter(|k| !k.trim().is_empty())
                } else {
                    None
                }
            })
    }

    pub fn perception_token(&self) -> Option<String> {
        self.perception
            .token
            .clone()
            .or_else(|| std::env::var("HF_TOKEN").ok())
            .filter(|t| !t.trim().is_empty())
    }

    /// Structural checks that do not need network access.
    pub fn validate(&self) -> BubbleResult<()> {
        if !self.llm.providers.contains_key(&self.llm.active_provider) {
            return Err(BubbleError::Config(format!(
                "active_provider '{}' is not defined under [llm.providers]",
                self.llm.active_provider
            )));
        }
        for (role, entry) in [
            ("proposer", self.llm.roles.proposer.as_ref()),
            ("grounder", self.llm.roles.grounder.as_ref()),
        ] {
            if let Some(entry) = entry {
                if !self.llm.providers.contains_key(&entry.provider) {
                    return Err(BubbleError::Config(format!(
                        "role '{role}' references unknown provider '{}'",
                        entry.provider
                    )));
                }
            }
        }
        if self.agent.grounding_attempts == 0 {
            return Err(BubbleError::Config(
                "agent.grounding_attempts must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(BubbleError::Config("retry.max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

fn resolve_config_path(explicit: Option<&Path>) -> BubbleResult<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(BubbleError::Config(format!(
            "config file {} does not exist",
            path.display()
        )));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    if let Some(dir) = dirs::config_dir() {
        let candidate = dir.join("bubble").join("config.toml");
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config found in user config dir");
            return Ok(candidate);
        }
    }

    Err(BubbleError::Config(
        "config.toml not found next to executable, in working directory, or in the user config dir"
            .into(),
    ))
}

pub fn parse_config(content: &str) -> BubbleResult<AppConfig> {
    let config: AppConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(explicit: Option<&Path>) -> BubbleResult<AppConfig> {
    let path = resolve_config_path(explicit)?;
    let content = std::fs::read_to_string(&path)?;
    let config = parse_config(&content)?;
    tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
    Ok(config)
}

pub fn save_config(config: &AppConfig, path: &Path) -> BubbleResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}
