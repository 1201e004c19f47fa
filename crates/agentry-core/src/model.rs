use std::sync::Arc;

use anyhow::Result;
use rig::client::CompletionClient;
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::providers::openai;
use tracing::debug;

use agentry_config::{Config, ProviderConfig};

/// Model identifiers accepted by the HTTP surface.
pub const SUPPORTED_MODELS: &[&str] = &["gpt-4.1", "o4-mini", "o3"];

/// Per-model parameter overrides keyed by model-name prefix.
#[derive(Debug, Clone, Default)]
pub struct ModelOverrides {
    pub entries: Vec<(String, OverrideParams)>,
}

#[derive(Debug, Clone, Default)]
pub struct OverrideParams {
    /// The model rejects a `temperature` parameter.
    pub no_temperature: bool,
    pub max_tokens: Option<u64>,
}

impl ModelOverrides {
    /// Reasoning models only accept the provider's default temperature.
    pub fn defaults() -> Self {
        let reasoning = OverrideParams {
            no_temperature: true,
            max_tokens: None,
        };
        Self {
            entries: vec![
                ("o3".to_string(), reasoning.clone()),
                ("o4-mini".to_string(), reasoning.clone()),
                ("o1".to_string(), reasoning),
            ],
        }
    }

    /// Find overrides for a model name (case-insensitive prefix match).
    pub fn find(&self, model_name: &str) -> Option<&OverrideParams> {
        let lower = model_name.to_lowercase();
        self.entries
            .iter()
            .find(|(pattern, _)| lower.starts_with(pattern.as_str()))
            .map(|(_, params)| params)
    }

    /// Effective (temperature, max_tokens) for a request to `model_name`.
    pub fn resolve(
        &self,
        model_name: &str,
        temperature: Option<f64>,
        max_tokens: u64,
    ) -> (Option<f64>, u64) {
        match self.find(model_name) {
            Some(o) => (
                if o.no_temperature { None } else { temperature },
                o.max_tokens.unwrap_or(max_tokens),
            ),
            None => (temperature, max_tokens),
        }
    }
}

/// Creates OpenAI completion model handles from the shared config.
#[derive(Clone)]
pub struct ModelFactory {
    config: Arc<Config>,
}

impl ModelFactory {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Build a model handle for `model_name`.
    ///
    /// Errors when no API key is available. Nothing is sent over the network here.
    #[allow(deprecated)]
    pub fn create(&self, model_name: &str) -> Result<CompletionModelHandle<'static>> {
        if model_name.is_empty() {
            anyhow::bail!("No model name given.");
        }
        let provider = self.config.providers.openai.as_ref();
        let key = resolve_api_key(provider, "OPENAI_API_KEY").ok_or_else(|| {
            anyhow::anyhow!(
                "No OpenAI API key found. \
                 Set providers.openai.apiKey in agentry.json or OPENAI_API_KEY env var."
            )
        })?;

        let mut builder = openai::CompletionsClient::builder().api_key(&key);
        if let Some(ref base) = provider
            .and_then(|c| c.api_base.clone())
            .filter(|b| !b.is_empty())
        {
            builder = builder.base_url(base);
        }
        let client: openai::CompletionsClient = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create OpenAI client: {e}"))?;
        let model = client.completion_model(model_name);
        debug!("Created OpenAI model handle for '{model_name}'");
        Ok(CompletionModelHandle::new(Arc::new(model)))
    }
}

fn resolve_api_key(provider_cfg: Option<&ProviderConfig>, env_var: &str) -> Option<String> {
    provider_cfg
        .and_then(|c| c.api_key.clone())
        .filter(|k| !k.is_empty())
        .or_else(|| std::env::var(env_var).ok().filter(|k| !k.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasoning_models_drop_temperature() {
        let overrides = ModelOverrides::defaults();
        assert_eq!(overrides.resolve("o3", Some(0.7), 4096), (None, 4096));
        assert_eq!(overrides.resolve("O4-mini", Some(0.7), 4096), (None, 4096));
        assert_eq!(
            overrides.resolve("gpt-4.1", Some(0.7), 4096),
            (Some(0.7), 4096)
        );
    }

    #[test]
    fn prefix_match_only() {
        let overrides = ModelOverrides::defaults();
        assert!(overrides.find("gpt-4o3").is_none());
        assert!(overrides.find("o3-pro").is_some());
    }

    #[test]
    fn create_with_configured_key() {
        let mut cfg = Config::default();
        cfg.providers.openai = Some(ProviderConfig {
            api_key: Some("sk-test".into()),
            api_base: Some("http://127.0.0.1:1/v1".into()),
        });
        let factory = ModelFactory::new(Arc::new(cfg));
        assert!(factory.create("gpt-4.1").is_ok());
        assert!(factory.create("").is_err());
    }
}
