//! OpenAI back-end. Gated behind the `openai` feature.

use super::rate_limiter::ProviderThrottle;
use super::retry::{run_with_backoff, BackoffConfig, Classification};
use super::{ChatMessage, Provider, ResponseFormat, Role, Usage};
use crate::config::ProviderConfig;
use crate::exceptions::{CastError, CastResult};
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs, ResponseFormat as OaiResponseFormat,
};
use async_openai::Client;
use async_trait::async_trait;

pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    throttle: ProviderThrottle,
    default_model: String,
    backoff: BackoffConfig,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig, throttle: ProviderThrottle) -> Self {
        let mut oai_config = OpenAIConfig::new();
        if let Some(api_key) = config.api_key {
            oai_config = oai_config.with_api_key(api_key);
        }
        if let Some(base_url) = config.base_url {
            oai_config = oai_config.with_api_base(base_url);
        }
        Self {
            client: Client::with_config(oai_config),
            throttle,
            default_model: config.model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
            backoff: BackoffConfig::default(),
        }
    }

    fn to_oai_message(message: &ChatMessage) -> CastResult<ChatCompletionRequestMessage> {
        let built = match message.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(message.content.clone())
                .build()
                .map(Into::into),
            Role::User => ChatCompletionRequestUserMessageArgs::default()
                .content(message.content.clone())
                .build()
                .map(Into::into),
            Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(message.content.clone())
                .build()
                .map(Into::into),
        };
        built.map_err(|err| CastError::provider_permanent("openai", err.to_string()))
    }

    fn classify(error: &CastError) -> Classification {
        match error {
            CastError::ProviderTransient { .. } => Classification::Transient { retry_after: None },
            _ => Classification::Permanent,
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f32,
        response_format: ResponseFormat,
        max_tokens: Option<usize>,
    ) -> CastResult<(String, Usage)> {
        let oai_messages: Vec<_> = messages
            .iter()
            .map(Self::to_oai_message)
            .collect::<CastResult<_>>()?;

        let prompt_chars: usize = messages.iter().map(|m| m.content.len()).sum();
        let prompt_tokens: usize = messages.iter().map(|m| self.count_tokens(&m.content, model)).sum();

        run_with_backoff("openai", self.backoff, Self::classify, || {
            let oai_messages = oai_messages.clone();
            async {
                let _permit = self.throttle.acquire().await;
                self.throttle.wait_for_budget(prompt_tokens).await;

                crate::logging::report_progress(crate::logging::ProgressEvent::ProviderCall {
                    provider: "openai".to_string(),
                    model: model.to_string(),
                    input_chars: prompt_chars,
                });

                let mut request = CreateChatCompletionRequestArgs::default();
                request.model(model).messages(oai_messages.clone()).temperature(temperature);
                if let Some(max_tokens) = max_tokens {
                    request.max_tokens(max_tokens as u32);
                }
                if response_format == ResponseFormat::Json {
                    request.response_format(OaiResponseFormat::JsonObject);
                }
                let request = request
                    .build()
                    .map_err(|err| CastError::provider_permanent("openai", err.to_string()))?;

                let response = self.client.chat().create(request).await.map_err(|err| {
                    CastError::provider_transient("openai", 1, err.to_string())
                })?;

                let choice = response
                    .choices
                    .into_iter()
                    .next()
                    .ok_or_else(|| CastError::provider_transient("openai", 1, "empty choices"))?;
                let content = choice.message.content.unwrap_or_default();

                let usage = response
                    .usage
                    .map(|u| Usage {
                        prompt_tokens: u.prompt_tokens as usize,
                        completion_tokens: u.completion_tokens as usize,
                    })
                    .unwrap_or_default();

                crate::logging::report_progress(crate::logging::ProgressEvent::ProviderResponse {
                    success: true,
                    output_chars: Some(content.len()),
                });

                Ok((content, usage))
            }
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
        if model.contains("gpt-4o") || model.contains("gpt-4.1") {
            128_000
        } else if model.contains("gpt-4-turbo") {
            128_000
        } else if model.contains("gpt-3.5") {
            16_384
        } else {
            128_000
        }
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
