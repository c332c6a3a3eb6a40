//! Unified configuration for the gender-transform pipeline.
//!
//! Mirrors the sibling fork's `LangExtractConfig`: one aggregate config with
//! a sub-config per concern, each carrying its own `Default` and a builder
//! method on the aggregate. Provider credentials are read from the process
//! environment exactly once, at `ProviderConfig::from_env` time — nothing
//! here re-reads the environment later.

use crate::data::QualityLevel;
use crate::providers::ProviderType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// The top-level configuration threaded through `analyze`/`transform`.
#[derive(Clone, Serialize, Deserialize)]
pub struct CastConfig {
    pub processing: ProcessingConfig,
    pub provider: ProviderConfig,
    pub chunking: ChunkingConfig,
    pub quality: QualityConfig,
    pub inference: InferenceConfig,
    #[serde(skip)]
    pub progress: ProgressConfig,
    /// External cancellation handle (spec.md §5): triggering this token
    /// aborts the pipeline at its next suspension point and discards
    /// whatever partial work was in flight. Not serialized -- a fresh,
    /// untriggered token by default.
    #[serde(skip, default = "CancellationToken::new")]
    pub cancellation: CancellationToken,
}

impl Default for CastConfig {
    fn default() -> Self {
        Self {
            processing: ProcessingConfig::default(),
            provider: ProviderConfig::default(),
            chunking: ChunkingConfig::default(),
            quality: QualityConfig::default(),
            inference: InferenceConfig::default(),
            progress: ProgressConfig::default(),
            cancellation: CancellationToken::new(),
        }
    }
}

impl std::fmt::Debug for CastConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CastConfig")
            .field("processing", &self.processing)
            .field("provider", &self.provider)
            .field("chunking", &self.chunking)
            .field("quality", &self.quality)
            .field("inference", &self.inference)
            .field("progress", &"<ProgressConfig>")
            .field("cancellation", &self.cancellation.is_cancelled())
            .finish()
    }
}

impl CastConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_processing(mut self, processing: ProcessingConfig) -> Self {
        self.processing = processing;
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_quality(mut self, quality: QualityConfig) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_inference(mut self, inference: InferenceConfig) -> Self {
        self.inference = inference;
        self
    }

    pub fn with_debug(mut self, enabled: bool) -> Self {
        self.processing.debug = enabled;
        self.progress.show_debug = enabled;
        self
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.processing.max_workers = workers;
        self
    }

    pub fn with_quiet_mode(mut self) -> Self {
        self.progress.show_progress = false;
        self.progress.show_debug = false;
        self
    }

    /// Run the pipeline against an externally owned cancellation token
    /// instead of the private one created by default.
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}

/// Concurrency and overall processing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Maximum number of concurrent in-flight provider calls issued by any
    /// one pipeline stage (bounded further by the provider's own semaphore).
    pub max_workers: usize,
    pub debug: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_workers: 6,
            debug: false,
        }
    }
}

/// Which back-end to call and with which model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_type: ProviderType,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Maximum in-flight requests for this provider: 5 for back-ends that
    /// serialize on the wire, 20 for highly concurrent ones.
    pub max_concurrency: usize,
    /// Requests-per-minute ceiling, if known.
    pub requests_per_minute: Option<u32>,
    /// Tokens-per-minute ceiling, if known.
    pub tokens_per_minute: Option<u32>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::ollama(None, None)
    }
}

impl ProviderConfig {
    pub fn openai(model: impl Into<Option<String>>, api_key: Option<String>) -> Self {
        Self {
            provider_type: ProviderType::OpenAi,
            model: model.into(),
            api_key,
            base_url: None,
            max_concurrency: 20,
            requests_per_minute: Some(500),
            tokens_per_minute: Some(200_000),
        }
    }

    pub fn anthropic(model: impl Into<Option<String>>, api_key: Option<String>) -> Self {
        Self {
            provider_type: ProviderType::Anthropic,
            model: model.into(),
            api_key,
            base_url: None,
            max_concurrency: 5,
            requests_per_minute: Some(50),
            tokens_per_minute: Some(100_000),
        }
    }

    pub fn ollama(model: impl Into<Option<String>>, base_url: Option<String>) -> Self {
        Self {
            provider_type: ProviderType::Ollama,
            model: model.into(),
            api_key: None,
            base_url: Some(base_url.unwrap_or_else(|| "http://localhost:11434".to_string())),
            max_concurrency: 5,
            requests_per_minute: None,
            tokens_per_minute: None,
        }
    }

    /// Construct from the process environment, read exactly once:
    /// `DEFAULT_PROVIDER` selects the back-end; `OPENAI_API_KEY` /
    /// `ANTHROPIC_API_KEY` supply credentials; `<PROVIDER>_MODEL` overrides
    /// the model.
    pub fn from_env() -> Self {
        let selected = std::env::var("DEFAULT_PROVIDER").unwrap_or_else(|_| "ollama".to_string());
        let provider_type = ProviderType::parse(&selected).unwrap_or(ProviderType::Ollama);

        match provider_type {
            ProviderType::OpenAi => {
                let model = std::env::var("OPENAI_MODEL").ok();
                let api_key = std::env::var("OPENAI_API_KEY").ok();
                Self::openai(model, api_key)
            }
            ProviderType::Anthropic => {
                let model = std::env::var("ANTHROPIC_MODEL").ok();
                let api_key = std::env::var("ANTHROPIC_API_KEY").ok();
                Self::anthropic(model, api_key)
            }
            ProviderType::Ollama => {
                let model = std::env::var("OLLAMA_MODEL").ok();
                let base_url = std::env::var("OLLAMA_BASE_URL").ok();
                Self::ollama(model, base_url)
            }
        }
    }
}

/// Token-budget targets for the chunker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Fraction of the model's context window a single chunk may target,
    /// leaving room for prompt, character context, and completion.
    pub target_budget_fraction: f32,
    /// Fraction of the context window a single character-analysis window
    /// may fill.
    pub analysis_budget_fraction: f32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_budget_fraction: 0.4,
            analysis_budget_fraction: 0.85,
        }
    }
}

/// Quality-control loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    pub level: QualityLevel,
    /// Sliding window (characters) scanned after a character's name mention
    /// for named-character-gender-mismatch detection.
    pub mention_window_chars: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            level: QualityLevel::Standard,
            mention_window_chars: 400,
        }
    }
}

/// Sampling parameters handed to the provider on every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub temperature: f32,
    pub max_tokens: Option<usize>,
    pub extra_params: HashMap<String, serde_json::Value>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: None,
            extra_params: HashMap::new(),
        }
    }
}

/// Progress reporting configuration (not serialized — carries a handle).
#[derive(Clone)]
pub struct ProgressConfig {
    pub show_progress: bool,
    pub show_debug: bool,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            show_progress: true,
            show_debug: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_ollama() {
        let config = CastConfig::default();
        assert_eq!(config.provider.provider_type, ProviderType::Ollama);
        assert_eq!(config.processing.max_workers, 6);
    }

    #[test]
    fn builder_methods_compose() {
        let config = CastConfig::new().with_debug(true).with_max_workers(12);
        assert!(config.processing.debug);
        assert!(config.progress.show_debug);
        assert_eq!(config.processing.max_workers, 12);
    }

    #[test]
    fn provider_presets_set_distinct_concurrency_ceilings() {
        let openai = ProviderConfig::openai(Some("gpt-4o".to_string()), None);
        let anthropic = ProviderConfig::anthropic(Some("claude-3-5-sonnet".to_string()), None);
        assert!(openai.max_concurrency > anthropic.max_concurrency);
    }
}
