//! Session controller for conversational exchanges with tool-calling
//! language-model backends.
//!
//! Provides:
//! - A `Session` that owns an append-only conversation history and runs
//!   the completion/function-call loop against any [`Engine`]
//! - A `FunctionRegistry` of schema-validated callables the model may invoke
//! - Budget-aware prompt construction with oldest-first truncation
//! - A structured retry/feedback protocol for failed function calls

pub mod error;
pub mod prompt;
pub mod registry;
pub mod saved;
pub mod schema;
pub mod session;
pub mod usage;

use async_trait::async_trait;

pub use error::{EngineError, FunctionCallError, PromptError, SessionError, SetupError};
pub use prompt::{PromptStrategy, TruncateOldest};
pub use registry::{FunctionFn, FunctionHandler, FunctionRegistry, HandlerError};
pub use saved::SavedSession;
pub use schema::{FunctionSchema, ParamSpec, ParamType, SchemaBuilder};
pub use session::{
    FullRound, FunctionErrorPolicy, MaxAttempts, ResolutionObserver, ResolutionOutcome, Session,
};
pub use usage::UsageTracker;

/// Capability contract a model backend must satisfy.
///
/// The controller only needs two operations: counting tokens for a prospective
/// prompt (the backend's own count is the source of truth for budgeting) and
/// generating a completion. Both may be slow and both may fail; neither is
/// retried by the controller itself.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Count the tokens `messages` would consume in a prompt, including the
    /// overhead of advertising `functions` to the model.
    async fn count_tokens(
        &self,
        messages: &[Message],
        functions: &[FunctionSchema],
    ) -> Result<u64, EngineError>;

    /// Generate the next completion for `messages`, with `functions`
    /// available for the model to call.
    async fn generate(
        &self,
        messages: &[Message],
        functions: &[FunctionSchema],
    ) -> Result<Completion, EngineError>;

    /// Release any resources held by the engine (connections, subprocesses).
    ///
    /// Called once at session teardown by the last session holding the
    /// engine. The default is a no-op, which callers must tolerate.
    async fn close(&self) {}
}

/// A single entry in a conversation.
///
/// This shape (role, content, name, function calls) is the stable
/// interchange schema for externally persisted histories; see
/// [`SavedSession`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// For a function result, the name of the function it answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Calls requested by an assistant message, in request order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub function_calls: Vec<FunctionCall>,
}

impl Message {
    /// A plain user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    /// A plain system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    /// A text-only assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// An assistant message carrying function-call requests.
    pub fn assistant_calls(content: Option<String>, calls: Vec<FunctionCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            name: None,
            function_calls: calls,
        }
    }

    /// The result of executing the named function (success or structured
    /// failure), fed back for the model to see.
    pub fn function_result(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::FunctionResult,
            content: Some(content.into()),
            name: Some(name.into()),
            function_calls: Vec::new(),
        }
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            name: None,
            function_calls: Vec::new(),
        }
    }

    pub fn has_function_calls(&self) -> bool {
        !self.function_calls.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    FunctionResult,
}

/// A model-emitted request to invoke a registered function.
///
/// `arguments` is the raw argument text from the backend — untrusted until
/// parsed and validated against the function's schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// One backend completion: an assistant message (text, call requests, or
/// both) plus the token usage the call reported.
#[derive(Debug, Clone)]
pub struct Completion {
    pub message: Message,
    pub usage: TokenUsage,
}

impl Completion {
    pub fn new(message: Message, usage: TokenUsage) -> Self {
        Self { message, usage }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}
