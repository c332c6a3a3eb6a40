//! Ollama back-end: a local, unauthenticated chat API.
//! Neither rate-limited by the server nor billed, so the provider config
//! leaves `requests_per_minute`/`tokens_per_minute` unset.

use super::rate_limiter::ProviderThrottle;
use super::retry::{run_with_backoff, BackoffConfig, Classification};
use super::{ChatMessage, Provider, ResponseFormat, Role, Usage};
use crate::config::ProviderConfig;
use crate::exceptions::{CastError, CastResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    throttle: ProviderThrottle,
    default_model: String,
    backoff: BackoffConfig,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig, throttle: ProviderThrottle) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            throttle,
            default_model: config.model.unwrap_or_else(|| "llama3.1".to_string()),
            backoff: BackoffConfig::default(),
        }
    }

    fn classify(error: &CastError) -> Classification {
        match error {
            CastError::ProviderTransient { .. } => Classification::Transient { retry_after: None },
            _ => Classification::Permanent,
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
    #[serde(default)]
    prompt_eval_count: usize,
    #[serde(default)]
    eval_count: usize,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

#[async_trait]
impl Provider for OllamaProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f32,
        response_format: ResponseFormat,
        _max_tokens: Option<usize>,
    ) -> CastResult<(String, Usage)> {
        let turns: Vec<_> = messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                json!({ "role": role, "content": m.content })
            })
            .collect();

        let prompt_chars: usize = messages.iter().map(|m| m.content.len()).sum();
        let prompt_tokens: usize = messages.iter().map(|m| self.count_tokens(&m.content, model)).sum();

        run_with_backoff("ollama", self.backoff, Self::classify, || async {
            let _permit = self.throttle.acquire().await;
            self.throttle.wait_for_budget(prompt_tokens).await;

            crate::logging::report_progress(crate::logging::ProgressEvent::ProviderCall {
                provider: "ollama".to_string(),
                model: model.to_string(),
                input_chars: prompt_chars,
            });

            let mut body = json!({
                "model": model,
                "messages": turns,
                "stream": false,
                "options": { "temperature": temperature },
            });
            if response_format == ResponseFormat::Json {
                body["format"] = json!("json");
            }

            let response = self
                .client
                .post(format!("{}/api/chat", self.base_url))
                .json(&body)
                .send()
                .await
                .map_err(|err| CastError::provider_transient("ollama", 1, err.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let classification = if status.is_server_error() {
                    CastError::provider_transient("ollama", 1, format!("http {status}: {body}"))
                } else {
                    CastError::provider_permanent("ollama", format!("http {status}: {body}"))
                };
                return Err(classification);
            }

            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|err| CastError::provider_transient("ollama", 1, err.to_string()))?;

            crate::logging::report_progress(crate::logging::ProgressEvent::ProviderResponse {
                success: true,
                output_chars: Some(parsed.message.content.len()),
            });

            Ok((
                parsed.message.content,
                Usage {
                    prompt_tokens: parsed.prompt_eval_count,
                    completion_tokens: parsed.eval_count,
                },
            ))
        })
        .await
    }

    fn count_tokens(&self, text: &str, model: &str) -> usize {
        crate::tokenizer::count_tokens(text, model)
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn context_window(&self, _model: &str) -> usize {
        8_192
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}
