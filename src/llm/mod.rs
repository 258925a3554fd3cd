pub mod oracle;


use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs, ResponseFormat,
    },
    Client,
};
use reqwest::header::{HeaderMap, HeaderValue};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::LlmConfig;
use crate::constants::oracle::DEFAULT_BASE_URL;
use crate::error::ConfigError;

pub use oracle::{decode_candidate, ChartOracle, DemoOracle, VisionOracle};

#[derive(Clone)]
pub struct LLMClient {
    pub client: Client<OpenAIConfig>,
    pub model: String,
}

impl LLMClient {
    pub fn new(api_key: String, base_url: Option<String>, model: String) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()));
        let client = Client::with_config(config).with_backoff(no_retry());
        Self { client, model }
    }

    /// Builds a client from config, attaching the OpenRouter attribution headers.
    pub fn from_config(config: &LlmConfig) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        if let Some(referer) = &config.http_referer {
            headers.insert("HTTP-Referer", header_value("llm.http_referer", referer)?);
        }
        if let Some(title) = &config.app_title {
            headers.insert("X-Title", header_value("llm.app_title", title)?);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigError::Invalid {
                field: "llm".to_string(),
                reason: e.to_string(),
            })?;

        let api_key = config.api_key.clone().unwrap_or_default();
        let mut llm = Self::new(api_key, config.base_url.clone(), config.model.clone());
        llm.client = llm.client.with_http_client(http);
        Ok(llm)
    }

    /// One JSON-mode completion with a system prompt and a single image.
    ///
    /// Returns the raw reply text, `None` when the model sent no content.
    pub async fn chat_with_image(
        &self,
        system_prompt: &str,
        image_url: &str,
    ) -> Result<Option<String>, OpenAIError> {
        info!("🤖 Sending request to LLM (Model: {})...", self.model);

        let image = ChatCompletionRequestMessageContentPartImageArgs::default()
            .image_url(
                ImageUrlArgs::default()
                    .url(image_url)
                    .detail(ImageDetail::High)
                    .build()?,
            )
            .build()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .response_format(ResponseFormat::JsonObject)
            .messages([
                ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(system_prompt)
                        .build()?,
                ),
                ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(ChatCompletionRequestUserMessageContent::Array(vec![
                            ChatCompletionRequestUserMessageContentPart::ImageUrl(image),
                        ]))
                        .build()?,
                ),
            ])
            .build()?;

        let response = self.client.chat().create(request).await?;

        info!("🤖 LLM Response received.");

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content);
        debug!("🤖 LLM raw content: {:?}", content);
        Ok(content)
    }
}

fn header_value(field: &str, value: &str) -> Result<HeaderValue, ConfigError> {
    HeaderValue::from_str(value).map_err(|e| ConfigError::Invalid {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

/// async-openai retries rate-limited calls by default; every oracle call
/// here must be a single attempt.
fn no_retry() -> backoff::ExponentialBackoff {
    backoff::ExponentialBackoffBuilder::new()
        .with_max_elapsed_time(Some(Duration::ZERO))
        .build()
}
