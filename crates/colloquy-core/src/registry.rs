//! Registry of functions the model may call.
//!
//! Each entry pairs a [`FunctionSchema`] with an async handler. Names are
//! unique: registering a duplicate is a setup error at registration time,
//! not at call time.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::SetupError;
use crate::schema::FunctionSchema;

/// Error type handlers may return; converted to text and fed back to the
/// model as an execution failure.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// An executable function exposed to the model.
///
/// `call` receives arguments already validated against [`Self::schema`] and
/// returns the textual result the model will see.
#[async_trait]
pub trait FunctionHandler: Send + Sync {
    fn schema(&self) -> &FunctionSchema;

    async fn call(&self, args: Value) -> Result<String, HandlerError>;
}

type HandlerFn = dyn Fn(Value) -> BoxFuture<'static, Result<String, HandlerError>> + Send + Sync;

/// A [`FunctionHandler`] backed by a closure returning a boxed future.
///
/// ```
/// # use colloquy_core::{FunctionFn, FunctionSchema, ParamType};
/// let schema = FunctionSchema::builder("echo", "Echo the input.")
///     .param("text", ParamType::String, "Text to echo")
///     .build()
///     .unwrap();
/// let echo = FunctionFn::new(schema, |args| {
///     Box::pin(async move { Ok(args["text"].as_str().unwrap_or_default().to_string()) })
/// });
/// ```
pub struct FunctionFn {
    schema: FunctionSchema,
    f: Box<HandlerFn>,
}

impl FunctionFn {
    pub fn new<F>(schema: FunctionSchema, f: F) -> Self
    where
        F: Fn(Value) -> BoxFuture<'static, Result<String, HandlerError>> + Send + Sync + 'static,
    {
        Self {
            schema,
            f: Box::new(f),
        }
    }
}

#[async_trait]
impl FunctionHandler for FunctionFn {
    fn schema(&self) -> &FunctionSchema {
        &self.schema
    }

    async fn call(&self, args: Value) -> Result<String, HandlerError> {
        (self.f)(args).await
    }
}

/// Function handlers indexed by name, preserving registration order for
/// prompt construction.
#[derive(Default)]
pub struct FunctionRegistry {
    handlers: Vec<Arc<dyn FunctionHandler>>,
    index: HashMap<String, usize>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Duplicate names are a configuration error.
    pub fn register(&mut self, handler: impl FunctionHandler + 'static) -> Result<(), SetupError> {
        self.register_shared(Arc::new(handler))
    }

    /// Register an already-shared handler.
    pub fn register_shared(&mut self, handler: Arc<dyn FunctionHandler>) -> Result<(), SetupError> {
        let name = handler.schema().name.clone();
        if self.index.contains_key(&name) {
            return Err(SetupError::DuplicateFunction(name));
        }
        self.index.insert(name, self.handlers.len());
        self.handlers.push(handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn FunctionHandler>> {
        self.index.get(name).map(|&i| &self.handlers[i])
    }

    /// Schemas of all registered functions, in registration order.
    pub fn schemas(&self) -> Vec<FunctionSchema> {
        self.handlers.iter().map(|h| h.schema().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.index.keys().collect::<Vec<_>>())
            .finish()
    }
}
