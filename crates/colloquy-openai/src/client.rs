//! OpenAI engine struct, request building, and response parsing.

use colloquy_core::{
    Completion, EngineError, FunctionCall, FunctionSchema, Message, Role, TokenUsage,
};

use super::config::OpenAiConfig;

// The heuristic backing `count_tokens`. The engine contract requires a
// self-consistent count, not tokenizer parity; roughly four characters per
// token plus per-message wire overhead keeps estimates conservative.
pub(crate) const CHARS_PER_TOKEN: u64 = 4;
pub(crate) const MESSAGE_OVERHEAD_TOKENS: u64 = 5;

/// Engine adapter for OpenAI-compatible chat-completion APIs.
pub struct OpenAiEngine {
    pub(crate) config: OpenAiConfig,
    pub(crate) http: reqwest::Client,
}

impl OpenAiEngine {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::builder()
                .connect_timeout(std::time::Duration::from_secs(10))
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .expect("failed to build HTTP client"),
        }
    }

    pub(crate) fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.api_base)
    }

    /// Build the JSON request body for the chat-completions API.
    pub(crate) fn build_request_body(
        &self,
        messages: &[Message],
        functions: &[FunctionSchema],
    ) -> serde_json::Value {
        let msgs: Vec<_> = messages.iter().map(to_wire_message).collect();

        let mut body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": msgs,
        });

        if !functions.is_empty() {
            let defs: Vec<_> = functions.iter().map(to_wire_function).collect();
            body["functions"] = serde_json::json!(defs);
        }

        body
    }

    /// Parse a chat-completions response into a [`Completion`].
    pub(crate) fn parse_response(
        &self,
        json: serde_json::Value,
    ) -> Result<Completion, EngineError> {
        let message = json["choices"]
            .get(0)
            .map(|choice| &choice["message"])
            .ok_or_else(|| EngineError::Parse("response has no choices".into()))?;

        let content = message["content"].as_str().map(String::from);

        // The wire format carries at most one call per completion; argument
        // text passes through unparsed and is validated by the session.
        let function_calls = match message.get("function_call") {
            Some(call) if !call.is_null() => vec![FunctionCall::new(
                call["name"].as_str().unwrap_or_default(),
                call["arguments"].as_str().unwrap_or_default(),
            )],
            _ => Vec::new(),
        };

        let usage = TokenUsage {
            prompt_tokens: json["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            completion_tokens: json["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        };

        Ok(Completion::new(
            Message {
                role: Role::Assistant,
                content,
                name: None,
                function_calls,
            },
            usage,
        ))
    }

    pub(crate) fn estimate_message(&self, message: &Message) -> u64 {
        let mut tokens = MESSAGE_OVERHEAD_TOKENS;
        if let Some(content) = &message.content {
            tokens += estimate_text(content);
        }
        if let Some(name) = &message.name {
            tokens += estimate_text(name);
        }
        for call in &message.function_calls {
            tokens += estimate_text(&call.name) + estimate_text(&call.arguments);
        }
        tokens
    }

    pub(crate) fn estimate_function(&self, function: &FunctionSchema) -> u64 {
        let declaration = to_wire_function(function).to_string();
        MESSAGE_OVERHEAD_TOKENS + estimate_text(&declaration)
    }
}

pub(crate) fn estimate_text(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(CHARS_PER_TOKEN)
}

fn to_wire_message(message: &Message) -> serde_json::Value {
    match message.role {
        Role::System => serde_json::json!({
            "role": "system",
            "content": message.content.as_deref().unwrap_or_default(),
        }),
        Role::User => serde_json::json!({
            "role": "user",
            "content": message.content.as_deref().unwrap_or_default(),
        }),
        Role::Assistant => {
            let mut msg = serde_json::json!({
                "role": "assistant",
                "content": message.content,
            });
            // The legacy function-calling wire format carries one call per
            // assistant message.
            if let Some(call) = message.function_calls.first() {
                msg["function_call"] = serde_json::json!({
                    "name": call.name,
                    "arguments": call.arguments,
                });
            }
            msg
        }
        Role::FunctionResult => serde_json::json!({
            "role": "function",
            "name": message.name.as_deref().unwrap_or_default(),
            "content": message.content.as_deref().unwrap_or_default(),
        }),
    }
}

fn to_wire_function(function: &FunctionSchema) -> serde_json::Value {
    serde_json::json!({
        "name": function.name,
        "description": function.description,
        "parameters": function.to_json_schema(),
    })
}
