//! Conversation session management.
//!
//! A `Session` owns the append-only conversation history and the function
//! registry, and drives the completion/function-call round state machine
//! against its engine.

mod manager;
mod round;
mod types;

pub use manager::Session;
pub use round::FullRound;
pub use types::{FunctionErrorPolicy, MaxAttempts, ResolutionObserver, ResolutionOutcome};
