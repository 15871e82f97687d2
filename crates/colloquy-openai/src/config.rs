//! OpenAI engine configuration.

use std::fmt;

use colloquy_core::EngineError;

pub(crate) const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Configuration for [`OpenAiEngine`](crate::OpenAiEngine).
///
/// Works against any OpenAI-compatible server; point `api_base` at a local
/// or proxy deployment to use one.
#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 1024,
            temperature: 0.7,
        }
    }

    /// Create config from the environment.
    ///
    /// Reads `OPENAI_API_KEY`, and `OPENAI_BASE_URL` when set.
    pub fn from_env() -> Result<Self, EngineError> {
        let key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            EngineError::Api("OpenAI API not configured. Set OPENAI_API_KEY.".into())
        })?;
        let mut config = Self::new(key);
        if let Ok(base) = std::env::var("OPENAI_BASE_URL") {
            config.api_base = base;
        }
        Ok(config)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}
