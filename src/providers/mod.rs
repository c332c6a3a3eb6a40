//! Provider abstraction layer.
//!
//! Defines the [`Provider`] trait and the shared request/response types used
//! by all concrete back-ends, plus an explicit [`ProviderRegistry`] — built
//! once at pipeline start and passed by reference rather than reached for
//! as a global singleton.

mod anthropic;
mod ollama;
#[cfg(feature = "openai")]
mod openai;
pub mod rate_limiter;
pub mod retry;

pub use anthropic::AnthropicProvider;
pub use ollama::OllamaProvider;
#[cfg(feature = "openai")]
pub use openai::OpenAiProvider;

use crate::config::ProviderConfig;
use crate::exceptions::CastResult;
use async_trait::async_trait;
use rate_limiter::ProviderThrottle;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Conversation participant role for a chat-style completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// The response format a caller may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    Json,
}

/// Token accounting for a single completion call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

impl Usage {
    pub fn total(&self) -> usize {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Which concrete back-end a `ProviderConfig` selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    OpenAi,
    Anthropic,
    Ollama,
}

impl ProviderType {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "openai" => Some(ProviderType::OpenAi),
            "anthropic" => Some(ProviderType::Anthropic),
            "ollama" => Some(ProviderType::Ollama),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ProviderType::OpenAi => "openai",
            ProviderType::Anthropic => "anthropic",
            ProviderType::Ollama => "ollama",
        }
    }
}

/// Uniform interface over heterogeneous LLM back-ends.
///
/// Implementations own their HTTP client and retry/rate-limit state; callers
/// never need to know which concrete back-end they are talking to.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Execute one chat-style completion.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f32,
        response_format: ResponseFormat,
        max_tokens: Option<usize>,
    ) -> CastResult<(String, Usage)>;

    /// Estimate the token count of `text` under `model`'s tokenizer.
    /// Implementations may approximate (e.g. chars/4) when no exact
    /// tokenizer is available.
    fn count_tokens(&self, text: &str, model: &str) -> usize;

    fn default_model(&self) -> &str;

    /// The model's context window in tokens, for chunk-sizing decisions.
    fn context_window(&self, model: &str) -> usize;

    fn name(&self) -> &'static str;
}

/// Explicit, constructed-once registry of providers, keyed by
/// [`ProviderType`]. Built at pipeline start and passed by reference through
/// every stage, with no hidden process-wide state.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderType, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: ProviderType, provider: Arc<dyn Provider>) {
        self.providers.insert(kind, provider);
    }

    pub fn get(&self, kind: ProviderType) -> Option<Arc<dyn Provider>> {
        self.providers.get(&kind).cloned()
    }

    /// Build a registry containing every provider whose optional dependency
    /// is compiled in, constructed from `config`'s selected provider plus
    /// whatever credentials are present in the environment.
    pub fn from_config(config: &ProviderConfig) -> Self {
        let mut registry = Self::new();
        let throttle = ProviderThrottle::new(config.max_concurrency, config.requests_per_minute, config.tokens_per_minute);

        match config.provider_type {
            #[cfg(feature = "openai")]
            ProviderType::OpenAi => {
                registry.register(
                    ProviderType::OpenAi,
                    Arc::new(OpenAiProvider::new(config.clone(), throttle)),
                );
            }
            #[cfg(not(feature = "openai"))]
            ProviderType::OpenAi => {}
            #[cfg(feature = "anthropic")]
            ProviderType::Anthropic => {
                registry.register(
                    ProviderType::Anthropic,
                    Arc::new(AnthropicProvider::new(config.clone(), throttle)),
                );
            }
            #[cfg(not(feature = "anthropic"))]
            ProviderType::Anthropic => {}
            #[cfg(feature = "ollama")]
            ProviderType::Ollama => {
                registry.register(
                    ProviderType::Ollama,
                    Arc::new(OllamaProvider::new(config.clone(), throttle)),
                );
            }
            #[cfg(not(feature = "ollama"))]
            ProviderType::Ollama => {}
        }

        registry
    }
}
