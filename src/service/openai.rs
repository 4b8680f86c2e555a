//! OpenAI-compatible chat completions client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{GenerationRequest, TextGenerationService};
use crate::core::config::ServiceSettings;
use crate::core::errors::{CompsetError, Result};

/// Chat completions request body
#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

/// A single chat message
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Chat completions response body
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
}

/// Choice within a chat completions response
#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatResponseMessage,
}

/// Message of a response choice
#[derive(Debug, Deserialize)]
pub struct ChatResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// Client for any endpoint speaking the chat completions protocol.
pub struct OpenAiChatService {
    endpoint: String,
    api_key: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiChatService {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, temperature: f32) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            temperature,
            client: reqwest::Client::new(),
        }
    }

    /// Build from settings, reading the key from the configured variable.
    pub fn from_settings(settings: &ServiceSettings) -> Result<Self> {
        let api_key = std::env::var(&settings.api_key_env).map_err(|_| {
            CompsetError::config_field(
                format!("{} environment variable not set", settings.api_key_env),
                "service.api_key_env",
            )
        })?;
        Ok(Self::new(
            settings.api_endpoint.clone(),
            api_key,
            settings.temperature,
        ))
    }

    fn body(&self, request: &GenerationRequest) -> ChatRequest {
        ChatRequest {
            model: request.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: request.system_instruction.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.prompt.clone(),
                },
            ],
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl TextGenerationService for OpenAiChatService {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        let purpose = request.purpose;
        let body = self.body(&request);
        debug!(
            "Sending {:?} request to {} ({} prompt chars)",
            purpose,
            self.endpoint,
            request.prompt.chars().count()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| purpose.error(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(purpose.error(format!("API error {status}: {error_text}")));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| purpose.error(format!("malformed response: {e}")))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| purpose.error("empty response"))
    }

    fn name(&self) -> &str {
        "openai-chat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::RequestPurpose;

    #[test]
    fn test_request_body_shape() {
        let service = OpenAiChatService::new("http://localhost/v1/chat/completions", "k", 0.3);
        let body = service.body(&GenerationRequest {
            system_instruction: "You are a marketing analyst.".into(),
            prompt: "Segment 1: grip".into(),
            model: "gpt-4o-mini".into(),
            purpose: RequestPurpose::Naming,
        });
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "Segment 1: grip");
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"['A', 'B']"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("['A', 'B']"));
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let settings = ServiceSettings {
            api_key_env: "COMPSET_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..ServiceSettings::default()
        };
        assert!(matches!(
            OpenAiChatService::from_settings(&settings),
            Err(CompsetError::Config { .. })
        ));
    }
}
