//! Anthropic back-end, speaking the `/v1/messages` API directly over
//! `reqwest` since `async-openai` does not cover it.

use super::rate_limiter::ProviderThrottle;
use super::retry::{run_with_backoff, BackoffConfig, Classification};
use super::{ChatMessage, Provider, ResponseFormat, Role, Usage};
use crate::config::ProviderConfig;
use crate::exceptions::{CastError, CastResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    throttle: ProviderThrottle,
    default_model: String,
    backoff: BackoffConfig,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig, throttle: ProviderThrottle) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.unwrap_or_default(),
            base_url: config.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            throttle,
            default_model: config.model.unwrap_or_else(|| "claude-3-5-sonnet-20241022".to_string()),
            backoff: BackoffConfig::default(),
        }
    }

    fn classify(error: &CastError) -> Classification {
        match error {
            CastError::ProviderTransient { message, .. } if message.contains("retry_after=") => {
                let seconds: u64 = message
                    .rsplit("retry_after=")
                    .next()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1);
                Classification::Transient {
                    retry_after: Some(Duration::from_secs(seconds)),
                }
            }
            CastError::ProviderTransient { .. } => Classification::Transient { retry_after: None },
            _ => Classification::Permanent,
        }
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: usize,
    output_tokens: usize,
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f32,
        response_format: ResponseFormat,
        max_tokens: Option<usize>,
    ) -> CastResult<(String, Usage)> {
        let system: Option<String> = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone());
        let turns: Vec<_> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                json!({
                    "role": if m.role == Role::Assistant { "assistant" } else { "user" },
                    "content": m.content,
                })
            })
            .collect();

        let prompt_chars: usize = messages.iter().map(|m| m.content.len()).sum();
        let prompt_tokens: usize = messages.iter().map(|m| self.count_tokens(&m.content, model)).sum();

        run_with_backoff("anthropic", self.backoff, Self::classify, || async {
            let _permit = self.throttle.acquire().await;
            self.throttle.wait_for_budget(prompt_tokens).await;

            crate::logging::report_progress(crate::logging::ProgressEvent::ProviderCall {
                provider: "anthropic".to_string(),
                model: model.to_string(),
                input_chars: prompt_chars,
            });

            let mut body = json!({
                "model": model,
                "messages": turns,
                "temperature": temperature,
                "max_tokens": max_tokens.unwrap_or(4096),
            });
            if let Some(system) = &system {
                body["system"] = json!(system);
            }
            if response_format == ResponseFormat::Json {
                body["system"] = json!(format!(
                    "{} Respond with a single JSON value and nothing else.",
                    system.clone().unwrap_or_default()
                ));
            }

            let response = self
                .client
                .post(format!("{}/v1/messages", self.base_url))
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
                .send()
                .await
                .map_err(|err| CastError::provider_transient("anthropic", 1, err.to_string()))?;

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1);
                return Err(CastError::provider_transient(
                    "anthropic",
                    1,
                    format!("http {status} retry_after={retry_after}"),
                ));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(CastError::provider_permanent(
                    "anthropic",
                    format!("http {status}: {body}"),
                ));
            }

            let parsed: MessagesResponse = response
                .json()
                .await
                .map_err(|err| CastError::provider_transient("anthropic", 1, err.to_string()))?;

            let content = parsed
                .content
                .into_iter()
                .map(|block| block.text)
                .collect::<Vec<_>>()
                .join("");

            crate::logging::report_progress(crate::logging::ProgressEvent::ProviderResponse {
                success: true,
                output_chars: Some(content.len()),
            });

            Ok((
                content,
                Usage {
                    prompt_tokens: parsed.usage.input_tokens,
                    completion_tokens: parsed.usage.output_tokens,
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

    fn context_window(&self, model: &str) -> usize {
        if model.contains("claude-3-5") || model.contains("claude-3-7") {
            200_000
        } else {
            100_000
        }
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}
