use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::client::{ChatService, DEFAULT_REQUEST_TIMEOUT};
use crate::http::DynHttpTransport;
use crate::provider::ProviderAdapter;
use crate::provider::anthropic_messages::AnthropicMessagesProvider;
use crate::provider::google_gemini::GoogleGeminiProvider;
use crate::provider::ollama::{DEFAULT_MAX_TOOL_ROUNDS, OllamaProvider};
use crate::provider::openai_chat::OpenAiChatProvider;
use crate::search::{DynSearchProvider, ExaSearch};
use crate::types::ProviderKind;

/// Shortest credential accepted for a hosted provider.
pub const MIN_API_KEY_CHARS: usize = 10;

/// Rejected configuration value.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
    #[error("{provider} API key must be at least {MIN_API_KEY_CHARS} characters long")]
    ApiKeyTooShort { provider: ProviderKind },
}

impl ConfigError {
    fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// One upstream backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider: ProviderKind,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Base URL override, e.g. an OpenAI-compatible proxy.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    /// `organization`, `project` (OpenAI); `version`, `beta`, `max_tokens` (Anthropic);
    /// `tool_models` (Ollama).
    #[serde(default)]
    pub extra_params: HashMap<String, Value>,
}

impl ProviderConfig {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            api_key: None,
            endpoint: None,
            default_model: None,
            extra_params: HashMap::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra_params.insert(key.into(), value);
        self
    }

    fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra_params.get(key).and_then(Value::as_str)
    }

    fn extra_u32(&self, key: &str) -> Result<Option<u32>, ConfigError> {
        let Some(value) = self.extra_params.get(key) else {
            return Ok(None);
        };
        value
            .as_u64()
            .and_then(|number| u32::try_from(number).ok())
            .filter(|number| *number > 0)
            .map(Some)
            .ok_or_else(|| ConfigError::invalid(key, format!("expected a positive integer, got {value}")))
    }

    /// Accepts a list of strings or one comma-separated string.
    fn extra_list(&self, key: &str) -> Vec<String> {
        match self.extra_params.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect(),
            Some(Value::String(text)) => split_list(text),
            _ => Vec::new(),
        }
    }
}

/// Exa credential for the Ollama `web_search` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub api_key: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Process-wide configuration, read once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_provider")]
    pub default_provider: ProviderKind,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default = "default_request_timeout", with = "seconds")]
    pub request_timeout: Duration,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    #[serde(default)]
    pub search: Option<SearchConfig>,
}

fn default_provider() -> ProviderKind {
    ProviderKind::OpenAi
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_max_tool_rounds() -> u32 {
    DEFAULT_MAX_TOOL_ROUNDS
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            providers: vec![ProviderConfig::new(ProviderKind::Ollama)],
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            search: None,
        }
    }
}

/// Environment prefix of each hosted provider's overrides.
const HOSTED: [(ProviderKind, &str); 3] = [
    (ProviderKind::OpenAi, "OPENAI"),
    (ProviderKind::Anthropic, "ANTHROPIC"),
    (ProviderKind::Gemini, "GEMINI"),
];

impl GatewayConfig {
    /// Reads the process environment.
    ///
    /// # Errors
    ///
    /// See [`GatewayConfig::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    ///
    /// `LLM_API_KEY`, `LLM_API_ENDPOINT` and `LLM_MODEL` apply to the provider named by
    /// `LLM_PROVIDER`; `OPENAI_*`, `ANTHROPIC_*`, `GEMINI_*` and `OLLAMA_*` variables
    /// override them per provider. Hosted providers without a key are left out. Ollama
    /// is always present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unparsable values and credentials shorter than
    /// [`MIN_API_KEY_CHARS`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let default_provider = match var("LLM_PROVIDER") {
            Some(name) => name
                .parse::<ProviderKind>()
                .map_err(|err| ConfigError::invalid("LLM_PROVIDER", err.to_string()))?,
            None => default_provider(),
        };
        // shared variables only fill in for the default provider
        let shared = |kind: ProviderKind, key: &str| {
            if kind == default_provider { var(key) } else { None }
        };

        let mut providers = Vec::new();
        for (kind, prefix) in HOSTED {
            let Some(api_key) = var(&format!("{prefix}_API_KEY")).or_else(|| shared(kind, "LLM_API_KEY"))
            else {
                continue;
            };
            let mut config = ProviderConfig::new(kind).with_api_key(api_key);
            config.endpoint =
                var(&format!("{prefix}_API_ENDPOINT")).or_else(|| shared(kind, "LLM_API_ENDPOINT"));
            config.default_model = var(&format!("{prefix}_MODEL")).or_else(|| shared(kind, "LLM_MODEL"));
            providers.push(config);
        }

        let mut ollama = ProviderConfig::new(ProviderKind::Ollama);
        ollama.api_key = var("OLLAMA_API_KEY");
        ollama.endpoint = var("OLLAMA_BASE_URL").or_else(|| shared(ProviderKind::Ollama, "LLM_API_ENDPOINT"));
        ollama.default_model = var("OLLAMA_MODEL").or_else(|| shared(ProviderKind::Ollama, "LLM_MODEL"));
        if let Some(models) = var("OLLAMA_TOOL_MODELS") {
            ollama = ollama.with_extra("tool_models", Value::from(split_list(&models)));
        }
        providers.push(ollama);

        let request_timeout = match var("API_REQUEST_TIMEOUT") {
            Some(raw) => {
                let seconds = raw
                    .parse::<u64>()
                    .ok()
                    .filter(|seconds| *seconds >= 1)
                    .ok_or_else(|| {
                        ConfigError::invalid(
                            "API_REQUEST_TIMEOUT",
                            format!("expected whole seconds >= 1, got {raw:?}"),
                        )
                    })?;
                Duration::from_secs(seconds)
            }
            None => DEFAULT_REQUEST_TIMEOUT,
        };
        let max_tool_rounds = match var("MAX_TOOL_ROUNDS") {
            Some(raw) => raw
                .parse::<u32>()
                .map_err(|err| ConfigError::invalid("MAX_TOOL_ROUNDS", err.to_string()))?,
            None => DEFAULT_MAX_TOOL_ROUNDS,
        };

        let search_enabled = match var("EXA_SEARCH_ENABLED") {
            Some(raw) => parse_flag(&raw).ok_or_else(|| {
                ConfigError::invalid("EXA_SEARCH_ENABLED", format!("expected a boolean, got {raw:?}"))
            })?,
            None => false,
        };
        let search = match var("EXA_API_KEY") {
            Some(api_key) if search_enabled => Some(SearchConfig {
                api_key,
                endpoint: var("EXA_API_ENDPOINT"),
            }),
            _ => None,
        };

        let config = Self {
            default_provider,
            providers,
            request_timeout,
            max_tool_rounds,
            search,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants [`build_service`] relies on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ApiKeyTooShort`] for a short hosted-provider credential
    /// and [`ConfigError::InvalidValue`] for a zero timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout.is_zero() {
            return Err(ConfigError::invalid("request_timeout", "must be at least one second"));
        }
        for provider in &self.providers {
            if let Some(key) = &provider.api_key {
                if provider.provider != ProviderKind::Ollama && key.trim().chars().count() < MIN_API_KEY_CHARS {
                    return Err(ConfigError::ApiKeyTooShort {
                        provider: provider.provider,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn provider(&self, kind: ProviderKind) -> Option<&ProviderConfig> {
        self.providers.iter().find(|provider| provider.provider == kind)
    }
}

/// Builds the immutable [`ChatService`] for `config`.
///
/// `search` overrides the Exa client derived from `config.search`; with neither, the
/// Ollama adapter never advertises tools.
///
/// # Errors
///
/// Returns [`ConfigError`] when validation or a provider's `extra_params` fail.
pub fn build_service(
    config: &GatewayConfig,
    transport: DynHttpTransport,
    search: Option<DynSearchProvider>,
) -> Result<ChatService, ConfigError> {
    config.validate()?;

    let search = search.or_else(|| {
        config.search.as_ref().map(|search| {
            let mut exa = ExaSearch::new(transport.clone(), search.api_key.clone())
                .with_timeout(config.request_timeout);
            if let Some(endpoint) = &search.endpoint {
                exa = exa.with_endpoint(endpoint.clone());
            }
            Arc::new(exa) as DynSearchProvider
        })
    });

    let mut builder = ChatService::builder()
        .default_provider(config.default_provider)
        .request_timeout(config.request_timeout);
    for provider in &config.providers {
        match build_adapter(config, provider, transport.clone(), search.clone())? {
            Some(adapter) => builder = builder.register(adapter),
            None => warn!(provider = %provider.provider, "no API key configured, provider disabled"),
        }
    }

    let service = builder.build();
    info!(
        default_provider = %service.default_provider(),
        providers = ?service.providers(),
        search = search.is_some(),
        "chat service configured"
    );
    Ok(service)
}

fn build_adapter(
    config: &GatewayConfig,
    provider: &ProviderConfig,
    transport: DynHttpTransport,
    search: Option<DynSearchProvider>,
) -> Result<Option<ProviderAdapter>, ConfigError> {
    let api_key = provider.api_key.clone();
    let adapter: ProviderAdapter = match provider.provider {
        ProviderKind::OpenAi => {
            let Some(api_key) = api_key else { return Ok(None) };
            let mut adapter = OpenAiChatProvider::new(transport, api_key)
                .with_request_timeout(config.request_timeout);
            if let Some(endpoint) = &provider.endpoint {
                adapter = adapter.with_base_url(endpoint.clone());
            }
            if let Some(model) = &provider.default_model {
                adapter = adapter.with_default_model(model.clone());
            }
            if let Some(organization) = provider.extra_str("organization") {
                adapter = adapter.with_organization(organization);
            }
            if let Some(project) = provider.extra_str("project") {
                adapter = adapter.with_project(project);
            }
            adapter.into()
        }
        ProviderKind::Anthropic => {
            let Some(api_key) = api_key else { return Ok(None) };
            let mut adapter = AnthropicMessagesProvider::new(transport, api_key)
                .with_request_timeout(config.request_timeout);
            if let Some(endpoint) = &provider.endpoint {
                adapter = adapter.with_base_url(endpoint.clone());
            }
            if let Some(model) = &provider.default_model {
                adapter = adapter.with_default_model(model.clone());
            }
            if let Some(version) = provider.extra_str("version") {
                adapter = adapter.with_version(version);
            }
            if let Some(beta) = provider.extra_str("beta") {
                adapter = adapter.with_beta(beta);
            }
            if let Some(max_tokens) = provider.extra_u32("max_tokens")? {
                adapter = adapter.with_default_max_tokens(max_tokens);
            }
            adapter.into()
        }
        ProviderKind::Gemini => {
            let Some(api_key) = api_key else { return Ok(None) };
            let mut adapter = GoogleGeminiProvider::new(transport, api_key)
                .with_request_timeout(config.request_timeout);
            if let Some(endpoint) = &provider.endpoint {
                adapter = adapter.with_base_url(endpoint.clone());
            }
            if let Some(model) = &provider.default_model {
                adapter = adapter.with_default_model(model.clone());
            }
            adapter.into()
        }
        ProviderKind::Ollama => {
            let mut adapter = OllamaProvider::new(transport)
                .with_request_timeout(config.request_timeout)
                .with_max_tool_rounds(config.max_tool_rounds)
                .with_tool_models(provider.extra_list("tool_models"));
            if let Some(endpoint) = &provider.endpoint {
                adapter = adapter.with_base_url(endpoint.clone());
            }
            if let Some(model) = &provider.default_model {
                adapter = adapter.with_default_model(model.clone());
            }
            if let Some(api_key) = api_key {
                adapter = adapter.with_api_key(api_key);
            }
            if let Some(search) = search {
                adapter = adapter.with_search(search);
            }
            adapter.into()
        }
    };
    Ok(Some(adapter))
}

fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Serializes a [`Duration`] as whole seconds.
mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::reqwest::default_dyn_transport;
    use serde_json::json;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn shared_variables_configure_the_default_provider() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("LLM_API_KEY", "sk-shared-0123456789"),
            ("LLM_MODEL", "gpt-4o"),
        ]))
        .expect("config");

        assert_eq!(config.default_provider, ProviderKind::OpenAi);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.max_tool_rounds, 1);
        assert!(config.search.is_none());

        let openai = config.provider(ProviderKind::OpenAi).expect("openai");
        assert_eq!(openai.api_key.as_deref(), Some("sk-shared-0123456789"));
        assert_eq!(openai.default_model.as_deref(), Some("gpt-4o"));
        assert!(config.provider(ProviderKind::Anthropic).is_none());
        assert!(config.provider(ProviderKind::Ollama).is_some());
    }

    #[test]
    fn per_provider_variables_override_shared_ones() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("LLM_PROVIDER", "Anthropic"),
            ("LLM_API_KEY", "shared-key-0123456789"),
            ("ANTHROPIC_API_KEY", "anthropic-key-0123"),
            ("GEMINI_API_KEY", "gemini-key-0123"),
            ("GEMINI_MODEL", "gemini-1.5-pro"),
            ("OLLAMA_BASE_URL", "http://gpu-box:11434"),
            ("OLLAMA_TOOL_MODELS", "llama, gpt-oss ,"),
            ("API_REQUEST_TIMEOUT", "15"),
            ("MAX_TOOL_ROUNDS", "2"),
        ]))
        .expect("config");

        assert_eq!(config.default_provider, ProviderKind::Anthropic);
        assert_eq!(
            config.provider(ProviderKind::Anthropic).unwrap().api_key.as_deref(),
            Some("anthropic-key-0123")
        );
        assert!(config.provider(ProviderKind::OpenAi).is_none());
        assert_eq!(
            config.provider(ProviderKind::Gemini).unwrap().default_model.as_deref(),
            Some("gemini-1.5-pro")
        );

        let ollama = config.provider(ProviderKind::Ollama).unwrap();
        assert_eq!(ollama.endpoint.as_deref(), Some("http://gpu-box:11434"));
        assert_eq!(ollama.extra_params["tool_models"], json!(["llama", "gpt-oss"]));
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.max_tool_rounds, 2);
    }

    #[test]
    fn short_keys_and_bad_numbers_are_rejected() {
        let short = GatewayConfig::from_lookup(lookup(&[("LLM_API_KEY", "short")])).unwrap_err();
        assert!(matches!(
            short,
            ConfigError::ApiKeyTooShort {
                provider: ProviderKind::OpenAi
            }
        ));

        let timeout = GatewayConfig::from_lookup(lookup(&[("API_REQUEST_TIMEOUT", "0")])).unwrap_err();
        assert!(matches!(timeout, ConfigError::InvalidValue { ref key, .. } if key == "API_REQUEST_TIMEOUT"));

        let provider = GatewayConfig::from_lookup(lookup(&[("LLM_PROVIDER", "mistral")])).unwrap_err();
        assert!(matches!(provider, ConfigError::InvalidValue { ref key, .. } if key == "LLM_PROVIDER"));
    }

    #[test]
    fn search_requires_key_and_explicit_opt_in() {
        let disabled = GatewayConfig::from_lookup(lookup(&[("EXA_API_KEY", "exa-key")])).unwrap();
        assert!(disabled.search.is_none());

        let enabled = GatewayConfig::from_lookup(lookup(&[
            ("EXA_API_KEY", "exa-key"),
            ("EXA_SEARCH_ENABLED", "true"),
        ]))
        .unwrap();
        assert_eq!(enabled.search.unwrap().api_key, "exa-key");
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: GatewayConfig = serde_json::from_value(json!({
            "default_provider": "gemini",
            "providers": [{"provider": "gemini", "api_key": "gemini-key-0123"}],
            "request_timeout": 30
        }))
        .expect("config");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.max_tool_rounds, DEFAULT_MAX_TOOL_ROUNDS);
        assert_eq!(config.providers[0].provider, ProviderKind::Gemini);
    }

    #[test]
    fn build_service_registers_configured_providers_only() {
        let transport = default_dyn_transport().expect("transport");
        let config = GatewayConfig {
            default_provider: ProviderKind::Anthropic,
            providers: vec![
                ProviderConfig::new(ProviderKind::OpenAi),
                ProviderConfig::new(ProviderKind::Anthropic)
                    .with_api_key("anthropic-key-0123")
                    .with_extra("max_tokens", json!(2048)),
                ProviderConfig::new(ProviderKind::Ollama).with_extra("tool_models", json!("llama")),
            ],
            ..GatewayConfig::default()
        };

        let service = build_service(&config, transport, None).expect("service");
        assert_eq!(
            service.providers(),
            vec![ProviderKind::Anthropic, ProviderKind::Ollama]
        );
        assert_eq!(service.default_provider(), ProviderKind::Anthropic);
        assert!(service.resolve(Some(ProviderKind::OpenAi)).is_err());
    }

    #[test]
    fn build_service_rejects_malformed_extra_params() {
        let transport = default_dyn_transport().expect("transport");
        let config = GatewayConfig {
            providers: vec![
                ProviderConfig::new(ProviderKind::Anthropic)
                    .with_api_key("anthropic-key-0123")
                    .with_extra("max_tokens", json!("lots")),
            ],
            ..GatewayConfig::default()
        };
        let err = build_service(&config, transport, None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "max_tokens"));
    }
}
