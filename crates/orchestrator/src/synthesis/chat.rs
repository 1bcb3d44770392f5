use async_trait::async_trait;
use codeloop_core::{Artifact, Candidate};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::parser::parse_candidate;
use super::types::{
    ApiErrorBody, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ResponseFormat,
};
use super::{Enricher, RepairRequest, SynthesisProvider};
use crate::error::ProviderError;
use crate::prompts::SynthesisPrompts;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub base_url: String,
    #[serde(skip)]
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub request_timeout_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: String::new(),
            model: "anthropic/claude-sonnet-4".to_string(),
            temperature: Some(0.2),
            max_tokens: Some(4096),
            request_timeout_ms: 120_000,
        }
    }
}

impl ProviderConfig {
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Synthesis over an OpenAI-compatible `/chat/completions` endpoint.
///
/// No retry happens here; a failed call fails the synthesis step.
#[derive(Debug, Clone)]
pub struct ChatCompletionProvider {
    client: Client,
    config: ProviderConfig,
}

impl ChatCompletionProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured(format!(
                "no API key for model {}",
                config.model
            )));
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        json_reply: bool,
    ) -> Result<String, ProviderError> {
        debug!(
            model = %self.config.model,
            messages = messages.len(),
            "Creating chat completion"
        );

        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            response_format: json_reply.then(ResponseFormat::json_object),
        };

        let response = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.config.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok());
            let error_text = response.text().await.unwrap_or_default();
            return Err(map_status(status, &error_text, retry_after));
        }

        let chat_response: ChatCompletionResponse = response.json().await?;
        chat_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ProviderError::MalformedResponse("no completion returned".to_string()))
    }
}

fn map_status(status: StatusCode, body: &str, retry_after: Option<u64>) -> ProviderError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .map(|parsed| parsed.error.message)
        .unwrap_or_else(|_| body.trim().to_string());
    let message = if message.is_empty() {
        status.to_string()
    } else {
        message
    };

    match status.as_u16() {
        429 => {
            warn!(retry_after = ?retry_after, "Rate limited by provider");
            ProviderError::RateLimited { retry_after }
        }
        401 | 403 => ProviderError::PermissionDenied(message),
        402 => ProviderError::QuotaExceeded(message),
        404 => ProviderError::NotFound(message),
        code => {
            error!(status = code, message = %message, "Provider API error");
            ProviderError::Api {
                message,
                status_code: Some(code),
            }
        }
    }
}

#[async_trait]
impl SynthesisProvider for ChatCompletionProvider {
    fn name(&self) -> String {
        self.config.model.clone()
    }

    async fn synthesize(&self, specification: &str) -> Result<Candidate, ProviderError> {
        info!(model = %self.config.model, "Requesting initial candidate");
        let reply = self
            .complete(
                vec![
                    ChatMessage::system(SynthesisPrompts::system()),
                    ChatMessage::user(SynthesisPrompts::synthesize(specification)),
                ],
                true,
            )
            .await?;
        parse_candidate(&reply)
    }

    async fn repair(&self, request: &RepairRequest) -> Result<Candidate, ProviderError> {
        info!(
            model = %self.config.model,
            iteration = request.iteration,
            "Requesting repair"
        );
        let reply = self
            .complete(
                vec![
                    ChatMessage::system(SynthesisPrompts::system()),
                    ChatMessage::user(SynthesisPrompts::repair(request)),
                ],
                true,
            )
            .await?;
        parse_candidate(&reply)
    }
}

#[async_trait]
impl Enricher for ChatCompletionProvider {
    async fn enrich(
        &self,
        specification: &str,
        artifact: &Artifact,
    ) -> Result<String, ProviderError> {
        self.complete(
            vec![ChatMessage::user(SynthesisPrompts::enrich(
                specification,
                artifact,
            ))],
            false,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            map_status(StatusCode::TOO_MANY_REQUESTS, "", Some(3)),
            ProviderError::RateLimited {
                retry_after: Some(3)
            }
        ));
        assert!(matches!(
            map_status(StatusCode::UNAUTHORIZED, "", None),
            ProviderError::PermissionDenied(_)
        ));
        assert!(matches!(
            map_status(StatusCode::FORBIDDEN, "", None),
            ProviderError::PermissionDenied(_)
        ));
        assert!(matches!(
            map_status(StatusCode::PAYMENT_REQUIRED, "", None),
            ProviderError::QuotaExceeded(_)
        ));
        assert!(matches!(
            map_status(StatusCode::NOT_FOUND, "", None),
            ProviderError::NotFound(_)
        ));
        assert!(matches!(
            map_status(StatusCode::BAD_GATEWAY, "upstream down", None),
            ProviderError::Api {
                status_code: Some(502),
                ..
            }
        ));
    }

    #[test]
    fn test_error_body_message_is_used() {
        let err = map_status(
            StatusCode::PAYMENT_REQUIRED,
            r#"{"error":{"message":"Insufficient credits"}}"#,
            None,
        );
        assert_eq!(err.to_string(), "Provider quota exceeded: Insufficient credits");
    }

    #[test]
    fn test_missing_api_key_rejected() {
        assert!(matches!(
            ChatCompletionProvider::new(ProviderConfig::default()),
            Err(ProviderError::NotConfigured(_))
        ));
    }
}
