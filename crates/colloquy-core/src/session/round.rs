//! The round state machine: one user utterance through to a final textual
//! assistant reply, including any intermediate function-call cycles.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::error::{EngineError, FunctionCallError, SessionError};
use crate::{FunctionCall, Message};

use super::manager::Session;
use super::types::ResolutionOutcome;

enum RoundState {
    AwaitingCompletion,
    DispatchingCalls(Vec<FunctionCall>),
    Complete,
}

impl Session {
    /// Start a full chat round: user message, then zero or more model turns
    /// until the model answers with plain text.
    ///
    /// Returns a handle yielding every message appended during the round
    /// (assistant turns and function results) in emission order:
    ///
    /// ```ignore
    /// let mut round = session.full_round("How's the weather?");
    /// while let Some(message) = round.next().await? {
    ///     // assistant turns and function results, as they are generated
    /// }
    /// ```
    ///
    /// Dropping the handle cancels the round; history keeps every message
    /// appended so far and never a partial one.
    pub fn full_round(&mut self, user_text: impl Into<String>) -> FullRound<'_> {
        let text = user_text.into();
        self.history.push(Message::user(text.trim()));
        FullRound {
            session: self,
            state: RoundState::AwaitingCompletion,
            pending: VecDeque::new(),
            retries: 0,
        }
    }

    /// Run a full round to completion and return only the final assistant
    /// message.
    pub async fn chat_round(
        &mut self,
        user_text: impl Into<String>,
    ) -> Result<Message, SessionError> {
        let mut round = self.full_round(user_text);
        let mut last = None;
        while let Some(message) = round.next().await? {
            last = Some(message);
        }
        last.ok_or_else(|| EngineError::Api("round ended without a completion".into()).into())
    }
}

/// An in-progress chat round. Finite, not restartable; borrows the session
/// for its whole lifetime, so one round runs at a time.
pub struct FullRound<'a> {
    session: &'a mut Session,
    state: RoundState,
    pending: VecDeque<Message>,
    /// Failures already fed back in the current resolution cycle.
    retries: u32,
}

impl FullRound<'_> {
    /// The next message appended during this round, or `None` once the
    /// model has answered with plain text.
    ///
    /// Prompt and engine failures end the round; function-call failures do
    /// not — they surface as function-result messages.
    pub async fn next(&mut self) -> Result<Option<Message>, SessionError> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(Some(message));
            }
            match std::mem::replace(&mut self.state, RoundState::Complete) {
                RoundState::Complete => return Ok(None),
                RoundState::AwaitingCompletion => self.await_completion().await?,
                RoundState::DispatchingCalls(calls) => self.dispatch(calls).await,
            }
        }
    }

    async fn await_completion(&mut self) -> Result<(), SessionError> {
        let session = &mut *self.session;
        let schemas = session.registry.schemas();
        let prompt = session
            .prompt_strategy
            .build(
                &session.history,
                &session.always_included,
                &schemas,
                session.token_budget,
                session.engine.as_ref(),
            )
            .await?;

        debug!(prompt_len = prompt.len(), "requesting completion");
        let completion = session.engine.generate(&prompt, &schemas).await?;
        session.usage.record(&completion.usage);

        let message = completion.message;
        session.history.push(message.clone());
        self.state = if message.has_function_calls() {
            RoundState::DispatchingCalls(message.function_calls.clone())
        } else {
            RoundState::Complete
        };
        self.pending.push_back(message);
        Ok(())
    }

    /// Resolve every call from one completion, in request order. All calls
    /// resolve before the model speaks again; the next state is always
    /// another completion so the model gets the last word.
    async fn dispatch(&mut self, calls: Vec<FunctionCall>) {
        for call in calls {
            let (message, outcome) = self.resolve_call(&call).await;
            if let Some(observer) = &self.session.observer {
                observer.on_resolution(&call.name, outcome);
            }
            self.session.history.push(message.clone());
            self.pending.push_back(message);
        }
        self.state = RoundState::AwaitingCompletion;
    }

    /// Resolve a single call. Never fails: every outcome is encoded as a
    /// function-result message the model will see.
    async fn resolve_call(&mut self, call: &FunctionCall) -> (Message, ResolutionOutcome) {
        let error = match self.try_call(call).await {
            Ok(output) => {
                self.retries = 0;
                let message = Message::function_result(&call.name, output);
                return (message, ResolutionOutcome::Success);
            }
            Err(error) => error,
        };

        let attempt = self.retries;
        let retry = self
            .session
            .error_policy
            .should_retry(call, &error, attempt)
            .await;
        let message = Message::function_result(&call.name, error.to_string());

        if retry {
            self.retries += 1;
            debug!(function = %call.name, attempt, %error, "function call failed, feeding back for retry");
            (message, ResolutionOutcome::RetryableFailure)
        } else {
            self.retries = 0;
            warn!(function = %call.name, attempt, %error, "function call failed terminally");
            let outcome = if matches!(error, FunctionCallError::NoSuchFunction(_)) {
                ResolutionOutcome::UnknownFunction
            } else {
                ResolutionOutcome::TerminalFailure
            };
            (message, outcome)
        }
    }

    async fn try_call(&self, call: &FunctionCall) -> Result<String, FunctionCallError> {
        let handler = self
            .session
            .registry
            .get(&call.name)
            .cloned()
            .ok_or_else(|| FunctionCallError::NoSuchFunction(call.name.clone()))?;
        let args = handler.schema().validate_raw(&call.arguments)?;
        debug!(function = %call.name, "executing function");
        handler
            .call(args)
            .await
            .map_err(|e| FunctionCallError::Execution(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::error::{EngineError, PromptError};
    use crate::schema::{FunctionSchema, ParamType};
    use crate::session::types::{FunctionErrorPolicy, ResolutionObserver};
    use crate::{Completion, Engine, FunctionFn, Role, TokenUsage};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Engine that replays a fixed script of completions. One token per
    /// message keeps everything under the default budget.
    struct ScriptEngine {
        script: Mutex<VecDeque<Result<Completion, EngineError>>>,
        generate_calls: AtomicU64,
        closed: Arc<AtomicBool>,
    }

    impl ScriptEngine {
        fn new(script: Vec<Result<Completion, EngineError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                generate_calls: AtomicU64::new(0),
                closed: Arc::new(AtomicBool::new(false)),
            }
        }

        fn generate_calls(&self) -> u64 {
            self.generate_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Engine for ScriptEngine {
        async fn count_tokens(
            &self,
            messages: &[Message],
            _functions: &[FunctionSchema],
        ) -> Result<u64, EngineError> {
            Ok(messages.len() as u64)
        }

        async fn generate(
            &self,
            _messages: &[Message],
            _functions: &[FunctionSchema],
        ) -> Result<Completion, EngineError> {
            self.generate_calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(EngineError::Api("script exhausted".into())))
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn text(content: &str) -> Result<Completion, EngineError> {
        Ok(Completion::new(
            Message::assistant(content),
            TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
            },
        ))
    }

    fn calls(requests: Vec<FunctionCall>) -> Result<Completion, EngineError> {
        Ok(Completion::new(
            Message::assistant_calls(None, requests),
            TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
            },
        ))
    }

    fn call(name: &str) -> Result<Completion, EngineError> {
        calls(vec![FunctionCall::new(name, "{}")])
    }

    fn clock(output: &'static str) -> FunctionFn {
        let schema = FunctionSchema::builder("get_time", "Current time.")
            .build()
            .unwrap();
        FunctionFn::new(schema, move |_| Box::pin(async move { Ok(output.into()) }))
    }

    fn broken_clock() -> FunctionFn {
        let schema = FunctionSchema::builder("get_time", "Current time.")
            .build()
            .unwrap();
        FunctionFn::new(schema, |_| {
            Box::pin(async { Err("clock offline".into()) })
        })
    }

    #[derive(Default)]
    struct Recorder {
        outcomes: Mutex<Vec<(String, ResolutionOutcome)>>,
    }

    impl ResolutionObserver for Recorder {
        fn on_resolution(&self, function: &str, outcome: ResolutionOutcome) {
            self.outcomes
                .lock()
                .unwrap()
                .push((function.to_string(), outcome));
        }
    }

    // A text-only completion ends the round in one engine call.
    #[tokio::test]
    async fn round_without_function_calls() {
        init_tracing();
        let engine = Arc::new(ScriptEngine::new(vec![text("hello")]));
        let mut session = Session::new(engine.clone()).with_token_budget(1000);

        let reply = session.chat_round("hi").await.unwrap();
        assert_eq!(reply.content.as_deref(), Some("hello"));
        assert_eq!(engine.generate_calls(), 1);

        let history = session.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], Message::user("hi"));
        assert_eq!(history[1], Message::assistant("hello"));
    }

    // A raising function's error is fed back and the model gets to retry.
    #[tokio::test]
    async fn failing_call_feeds_error_back_for_retry() {
        let engine = Arc::new(ScriptEngine::new(vec![call("get_time"), text("no luck")]));
        let mut session = Session::new(engine.clone());
        session.register(broken_clock()).unwrap();

        let mut emitted = Vec::new();
        let mut round = session.full_round("what time is it");
        while let Some(message) = round.next().await.unwrap() {
            emitted.push(message);
        }

        assert_eq!(engine.generate_calls(), 2);
        assert_eq!(emitted.len(), 3);
        assert!(emitted[0].has_function_calls());
        assert_eq!(emitted[1].role, Role::FunctionResult);
        assert!(emitted[1]
            .content
            .as_deref()
            .unwrap()
            .contains("clock offline"));
        assert_eq!(emitted[2], Message::assistant("no luck"));
    }

    // Retry bound: retry_attempts=1 means exactly one retryable failure
    // feedback, then terminal.
    #[tokio::test]
    async fn retry_attempts_bound_failures() {
        let observer = Arc::new(Recorder::default());
        let engine = Arc::new(ScriptEngine::new(vec![
            call("get_time"),
            call("get_time"),
            text("giving up"),
        ]));
        let mut session = Session::new(engine.clone())
            .with_retry_attempts(1)
            .with_observer(observer.clone());
        session.register(broken_clock()).unwrap();

        let reply = session.chat_round("time?").await.unwrap();
        assert_eq!(reply.content.as_deref(), Some("giving up"));

        let outcomes: Vec<_> = observer
            .outcomes
            .lock()
            .unwrap()
            .iter()
            .map(|(_, o)| *o)
            .collect();
        assert_eq!(
            outcomes,
            [
                ResolutionOutcome::RetryableFailure,
                ResolutionOutcome::TerminalFailure,
            ]
        );
    }

    // An unknown function is reported without consuming a retry attempt;
    // the next failing call still gets its full allowance.
    #[tokio::test]
    async fn unknown_function_consumes_no_retry() {
        let observer = Arc::new(Recorder::default());
        let engine = Arc::new(ScriptEngine::new(vec![
            call("get_weather"),
            call("get_time"),
            call("get_time"),
            text("done"),
        ]));
        let mut session = Session::new(engine.clone())
            .with_retry_attempts(1)
            .with_observer(observer.clone());
        session.register(broken_clock()).unwrap();

        session.chat_round("hm").await.unwrap();

        let outcomes = observer.outcomes.lock().unwrap();
        assert_eq!(
            *outcomes,
            [
                ("get_weather".to_string(), ResolutionOutcome::UnknownFunction),
                ("get_time".to_string(), ResolutionOutcome::RetryableFailure),
                ("get_time".to_string(), ResolutionOutcome::TerminalFailure),
            ]
        );

        // The model was told which function is missing.
        let unknown_result = &session.history()[2];
        assert_eq!(unknown_result.role, Role::FunctionResult);
        assert_eq!(unknown_result.name.as_deref(), Some("get_weather"));
        assert!(unknown_result
            .content
            .as_deref()
            .unwrap()
            .contains("is not defined"));
    }

    #[tokio::test]
    async fn successful_call_then_answer() {
        let engine = Arc::new(ScriptEngine::new(vec![call("get_time"), text("It is noon.")]));
        let mut session = Session::new(engine.clone());
        session.register(clock("12:00")).unwrap();

        let reply = session.chat_round("time?").await.unwrap();
        assert_eq!(reply.content.as_deref(), Some("It is noon."));

        let history = session.history();
        assert_eq!(history.len(), 4);
        assert_eq!(history[2], Message::function_result("get_time", "12:00"));
    }

    // All calls in one completion resolve before the next completion, with
    // results in request order.
    #[tokio::test]
    async fn batch_calls_resolve_in_request_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let engine = Arc::new(ScriptEngine::new(vec![
            calls(vec![
                FunctionCall::new("first", "{}"),
                FunctionCall::new("second", "{}"),
            ]),
            text("both done"),
        ]));
        let mut session = Session::new(engine.clone());
        for name in ["first", "second"] {
            let order = order.clone();
            let schema = FunctionSchema::builder(name, "ordered").build().unwrap();
            session
                .register(FunctionFn::new(schema, move |_| {
                    let order = order.clone();
                    Box::pin(async move {
                        order.lock().unwrap().push(name);
                        Ok(format!("{name} ok"))
                    })
                }))
                .unwrap();
        }

        session.chat_round("go").await.unwrap();

        assert_eq!(*order.lock().unwrap(), ["first", "second"]);
        let history = session.history();
        assert_eq!(history[2].name.as_deref(), Some("first"));
        assert_eq!(history[3].name.as_deref(), Some("second"));
        assert_eq!(engine.generate_calls(), 2);
    }

    #[tokio::test]
    async fn invalid_arguments_are_retryable() {
        let engine = Arc::new(ScriptEngine::new(vec![
            calls(vec![FunctionCall::new("echo", r#"{"text": 7}"#)]),
            calls(vec![FunctionCall::new("echo", r#"{"text": "hi"}"#)]),
            text("echoed"),
        ]));
        let mut session = Session::new(engine.clone());
        let schema = FunctionSchema::builder("echo", "Echo.")
            .param("text", ParamType::String, "Text")
            .build()
            .unwrap();
        session
            .register(FunctionFn::new(schema, |args| {
                Box::pin(async move { Ok(args["text"].as_str().unwrap_or_default().to_string()) })
            }))
            .unwrap();

        session.chat_round("say hi").await.unwrap();

        let history = session.history();
        assert!(history[2]
            .content
            .as_deref()
            .unwrap()
            .contains("must be of type string"));
        assert_eq!(history[4].content.as_deref(), Some("hi"));
    }

    // The policy hook is authoritative in both directions.
    #[tokio::test]
    async fn policy_can_force_retry_past_maximum() {
        struct StubbornPolicy;

        #[async_trait]
        impl FunctionErrorPolicy for StubbornPolicy {
            async fn should_retry(
                &self,
                _call: &FunctionCall,
                _error: &FunctionCallError,
                attempt: u32,
            ) -> bool {
                attempt < 3
            }
        }

        let observer = Arc::new(Recorder::default());
        let engine = Arc::new(ScriptEngine::new(vec![
            call("get_time"),
            call("get_time"),
            call("get_time"),
            call("get_time"),
            text("defeated"),
        ]));
        let mut session = Session::new(engine.clone())
            .with_error_policy(Arc::new(StubbornPolicy))
            .with_observer(observer.clone());
        session.register(broken_clock()).unwrap();

        session.chat_round("time?").await.unwrap();

        let outcomes: Vec<_> = observer
            .outcomes
            .lock()
            .unwrap()
            .iter()
            .map(|(_, o)| *o)
            .collect();
        assert_eq!(
            outcomes,
            [
                ResolutionOutcome::RetryableFailure,
                ResolutionOutcome::RetryableFailure,
                ResolutionOutcome::RetryableFailure,
                ResolutionOutcome::TerminalFailure,
            ]
        );
    }

    #[tokio::test]
    async fn policy_can_force_early_termination() {
        struct NeverRetry;

        #[async_trait]
        impl FunctionErrorPolicy for NeverRetry {
            async fn should_retry(
                &self,
                _call: &FunctionCall,
                _error: &FunctionCallError,
                _attempt: u32,
            ) -> bool {
                false
            }
        }

        let observer = Arc::new(Recorder::default());
        let engine = Arc::new(ScriptEngine::new(vec![call("get_time"), text("oh well")]));
        let mut session = Session::new(engine.clone())
            .with_error_policy(Arc::new(NeverRetry))
            .with_observer(observer.clone());
        session.register(broken_clock()).unwrap();

        session.chat_round("time?").await.unwrap();

        assert_eq!(
            observer.outcomes.lock().unwrap()[0].1,
            ResolutionOutcome::TerminalFailure
        );
    }

    // Messages are produced lazily: the function only runs once the round
    // is polled past the assistant's call message.
    #[tokio::test]
    async fn round_is_lazy_and_cancellable() {
        let ran = Arc::new(AtomicBool::new(false));
        let engine = Arc::new(ScriptEngine::new(vec![call("get_time"), text("noon")]));
        let mut session = Session::new(engine.clone());
        let flag = ran.clone();
        let schema = FunctionSchema::builder("get_time", "Current time.")
            .build()
            .unwrap();
        session
            .register(FunctionFn::new(schema, move |_| {
                let flag = flag.clone();
                Box::pin(async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok("12:00".into())
                })
            }))
            .unwrap();

        {
            let mut round = session.full_round("time?");
            let first = round.next().await.unwrap().unwrap();
            assert!(first.has_function_calls());
            assert!(!ran.load(Ordering::SeqCst), "function ran too early");
            // Round dropped here: cancellation at a suspension point.
        }

        // History holds only fully appended messages.
        assert_eq!(session.history().len(), 2);
        assert!(!ran.load(Ordering::SeqCst));

        // The session remains usable for another round.
        let reply = session.chat_round("time?").await.unwrap();
        assert!(reply.content.is_some());
    }

    #[tokio::test]
    async fn engine_failure_propagates() {
        let engine = Arc::new(ScriptEngine::new(vec![Err(EngineError::Timeout)]));
        let mut session = Session::new(engine.clone());

        let err = session.chat_round("hi").await.unwrap_err();
        assert!(matches!(err, SessionError::Engine(EngineError::Timeout)));
        // The user message is retained; no assistant message was appended.
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test]
    async fn oversized_always_included_is_fatal() {
        let engine = Arc::new(ScriptEngine::new(vec![text("unreachable")]));
        let mut session = Session::new(engine.clone())
            .with_system_prompt("be nice")
            .with_token_budget(0);

        let err = session.chat_round("hi").await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Prompt(PromptError::AlwaysIncludedTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn usage_accumulates_across_completions() {
        let engine = Arc::new(ScriptEngine::new(vec![call("get_time"), text("noon")]));
        let mut session = Session::new(engine.clone());
        session.register(clock("12:00")).unwrap();

        session.chat_round("time?").await.unwrap();

        assert_eq!(session.usage().completions(), 2);
        assert_eq!(session.usage().total().prompt_tokens, 20);
        assert_eq!(session.usage().total().completion_tokens, 10);
    }

    #[tokio::test]
    async fn history_persists_across_rounds() {
        let engine = Arc::new(ScriptEngine::new(vec![text("one"), text("two")]));
        let mut session = Session::new(engine.clone());

        session.chat_round("first").await.unwrap();
        session.chat_round("second").await.unwrap();

        let history = session.history();
        assert_eq!(history.len(), 4);
        assert_eq!(history[2], Message::user("second"));
        assert_eq!(history[3], Message::assistant("two"));
    }

    #[tokio::test]
    async fn user_text_is_trimmed() {
        let engine = Arc::new(ScriptEngine::new(vec![text("ok")]));
        let mut session = Session::new(engine.clone());

        session.chat_round("  hi there \n").await.unwrap();
        assert_eq!(session.history()[0], Message::user("hi there"));
    }

    #[tokio::test]
    async fn save_and_restore_round_trip() {
        let engine = Arc::new(ScriptEngine::new(vec![text("hello")]));
        let mut session = Session::new(engine.clone()).with_system_prompt("be terse");
        session.chat_round("hi").await.unwrap();

        let json = session.save().to_json().unwrap();
        let saved = crate::SavedSession::from_json(&json).unwrap();
        let restored = Session::from_saved(engine, saved);

        assert_eq!(restored.history(), session.history());
        assert_eq!(restored.always_included(), session.always_included());
    }

    #[tokio::test]
    async fn close_releases_engine_for_last_holder() {
        let engine = Arc::new(ScriptEngine::new(vec![]));
        let closed = engine.closed.clone();
        let first = Session::new(engine.clone());
        let second = Session::new(engine.clone());
        drop(engine);

        first.close().await;
        assert!(!closed.load(Ordering::SeqCst), "engine still shared");

        second.close().await;
        assert!(closed.load(Ordering::SeqCst));
    }
}
