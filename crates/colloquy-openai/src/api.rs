//! Engine trait implementation for OpenAiEngine.

use async_trait::async_trait;
use tracing::debug;

use colloquy_core::{Completion, Engine, EngineError, FunctionSchema, Message};

use super::client::OpenAiEngine;

#[async_trait]
impl Engine for OpenAiEngine {
    async fn count_tokens(
        &self,
        messages: &[Message],
        functions: &[FunctionSchema],
    ) -> Result<u64, EngineError> {
        let message_tokens: u64 = messages.iter().map(|m| self.estimate_message(m)).sum();
        let function_tokens: u64 = functions.iter().map(|f| self.estimate_function(f)).sum();
        Ok(message_tokens + function_tokens)
    }

    async fn generate(
        &self,
        messages: &[Message],
        functions: &[FunctionSchema],
    ) -> Result<Completion, EngineError> {
        let body = self.build_request_body(messages, functions);

        debug!(model = %self.config.model, messages = messages.len(), "chat completions request");

        let response = self
            .http
            .post(self.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Timeout
                } else {
                    EngineError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(EngineError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let text = text.chars().take(200).collect::<String>();
            return Err(EngineError::Api(format!("HTTP {status}: {text}")));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::Parse(e.to_string()))?;

        self.parse_response(json)
    }
}
