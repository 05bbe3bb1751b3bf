//! Handler registry for dispatching calls by command name.
//!
//! Each command name maps to at most one handler. Registering a name again
//! replaces the previous handler, and registering `None` removes it.
//!
//! # Example
//!
//! ```
//! use msgpack_server::handler::HandlerRegistry;
//!
//! let mut registry = HandlerRegistry::new();
//!
//! registry.insert_fn("echo", |payload, reply| async move {
//!     reply.respond(&payload).await
//! });
//!
//! assert!(registry.lookup("echo").is_some());
//! registry.remove("echo");
//! assert!(registry.lookup("echo").is_none());
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use rmpv::Value;
use serde::de::DeserializeOwned;

use super::ReplyChannel;
use crate::codec::MsgPackCodec;
use crate::error::Result;

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for command handlers.
pub trait Handler: Send + Sync + 'static {
    /// Handle a call with its decoded payload.
    fn call(&self, payload: Value, reply: ReplyChannel) -> BoxFuture<'static, HandlerResult>;
}

/// Adapter for closures taking the raw [`Value`] payload.
pub struct FnHandler<F> {
    handler: F,
}

impl<F> FnHandler<F> {
    /// Wrap a closure.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Value, ReplyChannel) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, payload: Value, reply: ReplyChannel) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(payload, reply))
    }
}

/// Wrapper that deserializes the payload before calling the handler.
pub struct TypedHandler<F, T, Fut>
where
    F: Fn(T, ReplyChannel) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, Fut> TypedHandler<F, T, Fut>
where
    F: Fn(T, ReplyChannel) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, Fut> Handler for TypedHandler<F, T, Fut>
where
    F: Fn(T, ReplyChannel) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, payload: Value, reply: ReplyChannel) -> BoxFuture<'static, HandlerResult> {
        let parsed: T = match MsgPackCodec::from_value(payload) {
            Ok(v) => v,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        Box::pin((self.handler)(parsed, reply))
    }
}

/// Registry mapping command names to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, replace, or remove the handler for `command`.
    ///
    /// `None` removes any existing registration.
    pub fn set(&mut self, command: &str, handler: Option<Arc<dyn Handler>>) {
        match handler {
            Some(handler) => {
                self.handlers.insert(command.to_string(), handler);
            }
            None => {
                self.handlers.remove(command);
            }
        }
    }

    /// Register a handler, replacing any previous one for the same command.
    pub fn insert(&mut self, command: &str, handler: Arc<dyn Handler>) {
        self.set(command, Some(handler));
    }

    /// Register a closure taking the raw payload.
    pub fn insert_fn<F, Fut>(&mut self, command: &str, handler: F)
    where
        F: Fn(Value, ReplyChannel) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.insert(command, Arc::new(FnHandler::new(handler)));
    }

    /// Register a closure whose payload is deserialized into `T` first.
    pub fn insert_typed<F, T, Fut>(&mut self, command: &str, handler: F)
    where
        F: Fn(T, ReplyChannel) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.insert(command, Arc::new(TypedHandler::new(handler)));
    }

    /// Remove the handler for `command`, returning it if present.
    pub fn remove(&mut self, command: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.remove(command)
    }

    /// Look up the handler for `command`.
    pub fn lookup(&self, command: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(command).cloned()
    }

    /// Check whether `command` has a handler.
    pub fn contains(&self, command: &str) -> bool {
        self.handlers.contains_key(command)
    }

    /// Registered command names, in no particular order.
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no command is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
