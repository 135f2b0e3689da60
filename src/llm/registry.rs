use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AdapterKind, AppConfig, LlmConfig};
use crate::errors::{BubbleError, BubbleResult};
use crate::llm::provider::ReasoningProvider;
use crate::llm::providers::gemini::GeminiProvider;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::CallConfig;

/// Roles the resolution loop asks the reasoning backend to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Proposer,
    Grounder,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Proposer => "proposer",
            Role::Grounder => "grounder",
        }
    }
}

/// Registry of constructed reasoning providers, keyed by their config.toml identifier.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ReasoningProvider>>,
    active: String,
    llm_config: LlmConfig,
}

impl ProviderRegistry {
    pub fn new(active: String, llm_config: LlmConfig) -> Self {
        Self {
            providers: HashMap::new(),
            active,
            llm_config,
        }
    }

    pub fn register(&mut self, provider: Arc<dyn ReasoningProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get_active(&self) -> BubbleResult<Arc<dyn ReasoningProvider>> {
        self.providers
            .get(&self.active)
            .cloned()
            .ok_or_else(|| BubbleError::Config(format!("Active provider '{}' not found in registry", self.active)))
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Return the provider and call configuration for a role.
    ///
    /// Role resolution order:
    /// 1. `[llm.roles.<role>]` in config.toml
    /// 2. Fallback: active provider with its default model / temperature
    pub fn call_config_for_role(&self, role: Role) -> BubbleResult<(Arc<dyn ReasoningProvider>, CallConfig)> {
        let role_entry = match role {
            Role::Proposer => self.llm_config.roles.proposer.as_ref(),
            Role::Grounder => self.llm_config.roles.grounder.as_ref(),
        };

        if let Some(entry) = role_entry {
            let provider = self.providers.get(&entry.provider).cloned().ok_or_else(|| {
                BubbleError::Config(format!(
                    "Role '{}' references unknown provider '{}'",
                    role.as_str(),
                    entry.provider
                ))
            })?;
            let temperature = entry.temperature.unwrap_or_else(|| {
                self.llm_config
                    .providers
                    .get(&entry.provider)
                    .map(|p| p.temperature)
                    .unwrap_or(0.1)
            });
            tracing::debug!(
                role = role.as_str(),
                provider = %entry.provider,
                model = %entry.model,
                temperature = temperature,
                "resolved role config"
            );
            return Ok((provider, CallConfig {
                model: entry.model.clone(),
                temperature,
            }));
        }

        let provider = self.get_active()?;
        let entry = self.llm_config.providers.get(&self.active);
        let (model, temperature) = entry
            .map(|p| (p.model.clone(), p.temperature))
            .unwrap_or_else(|| (String::new(), 0.1));
        tracing::debug!(
            role = role.as_str(),
            provider = %self.active,
            model = %model,
            "role not configured, using active provider fallback"
        );
        Ok((provider, CallConfig { model, temperature }))
    }

    /// Build every provider a role can reach. A reachable provider without an
    /// API key is a configuration error here, not at first use.
    pub fn from_config(config: &AppConfig) -> BubbleResult<Self> {
        let mut registry = Self::new(config.llm.active_provider.clone(), config.llm.clone());

        let mut needed: Vec<&str> = vec![config.llm.active_provider.as_str()];
        for entry in [&config.llm.roles.proposer, &config.llm.roles.grounder]
            .into_iter()
            .flatten()
        {
            needed.push(entry.provider.as_str());
        }
        needed.sort();
        needed.dedup();

        for id in needed {
            let entry = config.llm.providers.get(id).ok_or_else(|| {
                BubbleError::Config(format!("provider '{id}' is not defined under [llm.providers]"))
            })?;
            let api_key = config.api_key_for(id).ok_or_else(|| {
                BubbleError::Config(format!(
                    "no API key for provider '{id}' (set BUBBLE_{}_API_KEY or api_key)",
                    id.to_uppercase()
                ))
            })?;
            let timeout = Duration::from_secs(entry.timeout_secs.max(1));
            let provider: Arc<dyn ReasoningProvider> = match entry.adapter {
                AdapterKind::Gemini => Arc::new(GeminiProvider::new(
                    id.to_string(),
                    entry.api_base.clone(),
                    api_key,
                    config.llm.safety.clone(),
                    config.retry.clone(),
                    timeout,
                )?),
                AdapterKind::Openai => Arc::new(OpenAiCompatibleProvider::new(
                    id.to_string(),
                    entry.api_base.clone(),
                    api_key,
                    config.retry.clone(),
                    timeout,
                )?),
            };
            tracing::info!(provider = id, adapter = ?entry.adapter, display = %entry.display_name, "provider registered");
            registry.register(provider);
        }
        Ok(registry)
    }
}
