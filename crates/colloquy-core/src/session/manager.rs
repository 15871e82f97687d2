//! Session struct, construction, and lifecycle.

use std::sync::Arc;

use crate::prompt::{PromptStrategy, TruncateOldest};
use crate::registry::{FunctionHandler, FunctionRegistry};
use crate::saved::SavedSession;
use crate::usage::UsageTracker;
use crate::{error::SetupError, Engine, Message};

use super::types::{FunctionErrorPolicy, MaxAttempts, ResolutionObserver};

pub(super) const DEFAULT_TOKEN_BUDGET: u64 = 4096;
pub(super) const DEFAULT_RETRY_ATTEMPTS: u32 = 1;

/// A conversation with one engine: append-only history, always-included
/// prefix messages, registered functions, and retry/budget configuration.
///
/// One round runs at a time; [`Session::full_round`] borrows the session
/// mutably for the duration of the round.
pub struct Session {
    pub(super) engine: Arc<dyn Engine>,
    pub(super) history: Vec<Message>,
    pub(super) always_included: Vec<Message>,
    pub(super) registry: FunctionRegistry,
    pub(super) prompt_strategy: Arc<dyn PromptStrategy>,
    pub(super) error_policy: Arc<dyn FunctionErrorPolicy>,
    pub(super) observer: Option<Arc<dyn ResolutionObserver>>,
    pub(super) usage: UsageTracker,
    pub(super) token_budget: u64,
}

impl Session {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            history: Vec::new(),
            always_included: Vec::new(),
            registry: FunctionRegistry::new(),
            prompt_strategy: Arc::new(TruncateOldest::new()),
            error_policy: Arc::new(MaxAttempts::new(DEFAULT_RETRY_ATTEMPTS)),
            observer: None,
            usage: UsageTracker::new(),
            token_budget: DEFAULT_TOKEN_BUDGET,
        }
    }

    /// Prepend a system prompt to the always-included messages.
    pub fn with_system_prompt(mut self, prompt: impl AsRef<str>) -> Self {
        self.always_included
            .insert(0, Message::system(prompt.as_ref().trim()));
        self
    }

    /// Messages included in every prompt regardless of truncation (few-shot
    /// examples and the like), after any system prompt.
    pub fn with_always_included(mut self, messages: Vec<Message>) -> Self {
        self.always_included.extend(messages);
        self
    }

    /// Seed the conversation history.
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_registry(mut self, registry: FunctionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_prompt_strategy(mut self, strategy: Arc<dyn PromptStrategy>) -> Self {
        self.prompt_strategy = strategy;
        self
    }

    pub fn with_error_policy(mut self, policy: Arc<dyn FunctionErrorPolicy>) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ResolutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Maximum prompt size, in the engine's token units.
    pub fn with_token_budget(mut self, token_budget: u64) -> Self {
        self.token_budget = token_budget;
        self
    }

    /// How many failure feedbacks the model gets before a failing call is
    /// declared terminal. Replaces the error policy with [`MaxAttempts`].
    pub fn with_retry_attempts(mut self, retry_attempts: u32) -> Self {
        self.error_policy = Arc::new(MaxAttempts::new(retry_attempts));
        self
    }

    /// Restore a session from a saved envelope.
    pub fn from_saved(engine: Arc<dyn Engine>, saved: SavedSession) -> Self {
        Self::new(engine)
            .with_always_included(saved.always_included)
            .with_history(saved.history)
    }

    /// Register a function the model may call.
    pub fn register(&mut self, handler: impl FunctionHandler + 'static) -> Result<(), SetupError> {
        self.registry.register(handler)
    }

    /// The full conversation history (never truncated by prompting).
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn always_included(&self) -> &[Message] {
        &self.always_included
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Cumulative token usage across this session's completions.
    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    /// Snapshot the conversation for external persistence.
    pub fn save(&self) -> SavedSession {
        SavedSession::new(self.always_included.clone(), self.history.clone())
    }

    /// Tear down the session, releasing engine resources if this was the
    /// last session holding the engine.
    pub async fn close(self) {
        let Session { engine, .. } = self;
        if Arc::strong_count(&engine) == 1 {
            engine.close().await;
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("history_len", &self.history.len())
            .field("always_included", &self.always_included.len())
            .field("functions", &self.registry.len())
            .field("token_budget", &self.token_budget)
            .finish()
    }
}
