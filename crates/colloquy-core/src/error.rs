//! Error taxonomy for the session controller.
//!
//! Configuration mistakes ([`SetupError`], [`PromptError`]) are fatal and
//! surface immediately. Function-call failures ([`FunctionCallError`]) never
//! cross the round boundary — they are encoded into function-result messages
//! so the model can react. Only prompt and engine failures propagate out of
//! a round as [`SessionError`].

/// Errors raised at configuration time, never retried.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("function {0:?} is already registered")]
    DuplicateFunction(String),

    #[error("invalid function schema: {0}")]
    InvalidSchema(String),
}

/// Errors reported by an [`Engine`](crate::Engine) implementation.
///
/// The controller does not retry these; transient-vs-fatal policy belongs to
/// the adapter or the caller.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("api error: {0}")]
    Api(String),

    #[error("rate limited")]
    RateLimited,

    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("timeout")]
    Timeout,
}

/// Errors from prompt construction.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    /// The always-included messages alone exceed the token budget. No amount
    /// of truncation can produce a valid prompt.
    #[error("always-included messages ({needed} tokens) exceed the token budget ({budget})")]
    AlwaysIncludedTooLarge { needed: u64, budget: u64 },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// A single function call went wrong.
///
/// Encoded into a function-result message rather than raised, so the model
/// sees the failure and can retry intelligently.
#[derive(Debug, thiserror::Error)]
pub enum FunctionCallError {
    /// The model named a function that is not registered. Retrying the same
    /// arguments cannot fix this, so it never consumes a retry attempt.
    #[error("The function {0:?} is not defined. Only use the provided functions.")]
    NoSuchFunction(String),

    /// The raw argument text failed to parse or validate against the schema.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The function executed and returned an error.
    #[error("{0}")]
    Execution(String),
}

impl FunctionCallError {
    /// Whether the model may plausibly fix this failure with another attempt.
    pub fn retryable(&self) -> bool {
        !matches!(self, FunctionCallError::NoSuchFunction(_))
    }
}

/// The only error type that crosses the round boundary.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}
