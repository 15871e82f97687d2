//! Budget-aware prompt construction.
//!
//! A [`PromptStrategy`] turns the full conversation history into the message
//! sequence actually sent to the engine. The default, [`TruncateOldest`],
//! reserves space for the always-included messages, then keeps as many of
//! the most recent history messages as fit — dropping oldest first, never
//! splitting a message, and never splitting a call/result pair.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::error::PromptError;
use crate::schema::FunctionSchema;
use crate::{Engine, Message, Role};

/// Strategy for constructing the prompt sent to the engine.
///
/// Implementations must be pure over their inputs plus engine token-count
/// queries: truncation affects what is sent, never what the session retains.
#[async_trait]
pub trait PromptStrategy: Send + Sync {
    async fn build(
        &self,
        history: &[Message],
        always_included: &[Message],
        functions: &[FunctionSchema],
        token_budget: u64,
        engine: &dyn Engine,
    ) -> Result<Vec<Message>, PromptError>;
}

/// Insertion-ordered memo of per-message token counts, so rebuilding the
/// prompt each model turn does not re-query the engine for old messages.
struct FifoCache {
    capacity: usize,
    counts: HashMap<Message, u64>,
    order: VecDeque<Message>,
}

impl FifoCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            counts: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, message: &Message) -> Option<u64> {
        self.counts.get(message).copied()
    }

    fn insert(&mut self, message: Message, tokens: u64) {
        if self.counts.contains_key(&message) {
            return;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.counts.remove(&evicted);
            }
        }
        self.counts.insert(message.clone(), tokens);
        self.order.push_back(message);
    }
}

/// The default prompt strategy: greedy right-truncation from the front of
/// history, oldest messages evicted first.
pub struct TruncateOldest {
    cache: Mutex<FifoCache>,
}

impl TruncateOldest {
    pub fn new() -> Self {
        Self::with_cache_capacity(256)
    }

    pub fn with_cache_capacity(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(FifoCache::new(capacity)),
        }
    }

    async fn message_tokens(
        &self,
        message: &Message,
        engine: &dyn Engine,
    ) -> Result<u64, PromptError> {
        if let Ok(cache) = self.cache.lock() {
            if let Some(tokens) = cache.get(message) {
                return Ok(tokens);
            }
        }
        let tokens = engine
            .count_tokens(std::slice::from_ref(message), &[])
            .await?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(message.clone(), tokens);
        }
        Ok(tokens)
    }
}

impl Default for TruncateOldest {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PromptStrategy for TruncateOldest {
    async fn build(
        &self,
        history: &[Message],
        always_included: &[Message],
        functions: &[FunctionSchema],
        token_budget: u64,
        engine: &dyn Engine,
    ) -> Result<Vec<Message>, PromptError> {
        let needed = engine.count_tokens(always_included, functions).await?;
        if needed > token_budget {
            return Err(PromptError::AlwaysIncludedTooLarge {
                needed,
                budget: token_budget,
            });
        }

        let mut remaining = token_budget - needed;
        let mut kept = 0usize;
        for message in history.iter().rev() {
            let tokens = self.message_tokens(message, engine).await?;
            if tokens > remaining {
                break;
            }
            remaining -= tokens;
            kept += 1;
        }

        let mut tail = &history[history.len() - kept..];
        if tail.len() < history.len() {
            // The requesting assistant message was evicted; its results must
            // go with it so no orphaned result leads the prompt.
            let orphans = tail
                .iter()
                .take_while(|m| m.role == Role::FunctionResult)
                .count();
            tail = &tail[orphans..];
        }

        if tail.len() < history.len() {
            debug!(
                dropped = history.len() - tail.len(),
                kept = tail.len(),
                "truncated history for prompt"
            );
        }

        let mut prompt = always_included.to_vec();
        prompt.extend_from_slice(tail);
        Ok(prompt)
    }
}
