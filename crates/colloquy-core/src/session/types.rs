//! Hooks for customizing function-call failure handling and observing
//! resolution outcomes.

use async_trait::async_trait;

use crate::error::FunctionCallError;
use crate::FunctionCall;

/// Decides whether a failed function call should be retried.
///
/// Consulted before a failure is declared terminal; the decision is
/// authoritative and may force early termination or force a retry past any
/// configured maximum.
#[async_trait]
pub trait FunctionErrorPolicy: Send + Sync {
    /// `attempt` is the number of failures already fed back for the current
    /// resolution cycle (0 on the first failure).
    async fn should_retry(
        &self,
        call: &FunctionCall,
        error: &FunctionCallError,
        attempt: u32,
    ) -> bool;
}

/// Default policy: retry recoverable failures until the configured number
/// of attempts is exhausted.
#[derive(Debug, Clone, Copy)]
pub struct MaxAttempts {
    retry_attempts: u32,
}

impl MaxAttempts {
    pub fn new(retry_attempts: u32) -> Self {
        Self { retry_attempts }
    }
}

#[async_trait]
impl FunctionErrorPolicy for MaxAttempts {
    async fn should_retry(
        &self,
        _call: &FunctionCall,
        error: &FunctionCallError,
        attempt: u32,
    ) -> bool {
        error.retryable() && attempt < self.retry_attempts
    }
}

/// How a single function-call resolution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    Success,
    /// Failed; the model is being asked for another completion.
    RetryableFailure,
    /// Failed with no retry granted.
    TerminalFailure,
    /// The model named a function that is not registered.
    UnknownFunction,
}

/// Callback invoked with the outcome of every function-call resolution.
pub trait ResolutionObserver: Send + Sync {
    fn on_resolution(&self, function: &str, outcome: ResolutionOutcome);
}
