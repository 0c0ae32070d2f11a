//! Legacy command bus.
//!
//! The older protocol pushes one-way `{type, data}` events. Each event is
//! delivered to at most one handler and never answered; failures are logged
//! and swallowed.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use metrics::counter;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::types::LegacyCommand;

/// Error returned by a legacy command handler.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The handler could not carry out the command.
    #[error("{message}")]
    Failed {
        /// Description.
        message: String,
    },
    /// The payload did not have the expected shape.
    #[error("invalid payload: {message}")]
    InvalidPayload {
        /// Deserialization error.
        message: String,
    },
}

impl CommandError {
    /// Shorthand for [`CommandError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// What happened to a dispatched command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    /// A handler ran to completion.
    Handled,
    /// No handler is registered for the name.
    Unhandled,
    /// The handler failed or panicked.
    Failed(String),
}

/// Handler for one legacy command name.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle the command payload (`Value::Null` when the frame had none).
    async fn handle(&self, payload: Value) -> Result<(), CommandError>;
}

struct FnCommand<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> CommandHandler for FnCommand<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), CommandError>> + Send,
{
    async fn handle(&self, payload: Value) -> Result<(), CommandError> {
        (self.f)(payload).await
    }
}

struct TypedCommand<P, F> {
    f: F,
    _marker: std::marker::PhantomData<fn(P)>,
}

#[async_trait]
impl<P, F, Fut> CommandHandler for TypedCommand<P, F>
where
    P: DeserializeOwned + Send + 'static,
    F: Fn(P) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), CommandError>> + Send,
{
    async fn handle(&self, payload: Value) -> Result<(), CommandError> {
        let payload: P =
            serde_json::from_value(payload).map_err(|e| CommandError::InvalidPayload {
                message: e.to_string(),
            })?;
        (self.f)(payload).await
    }
}

/// Name → handler table for legacy commands.
#[derive(Default)]
pub struct CommandBus {
    handlers: RwLock<HashMap<String, Arc<dyn CommandHandler>>>,
}

impl CommandBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for `name`.
    pub fn register(&self, name: &str, handler: impl CommandHandler + 'static) {
        let _ = self
            .handlers
            .write()
            .insert(name.to_owned(), Arc::new(handler));
    }

    /// Register an async closure over the raw payload.
    pub fn register_fn<F, Fut>(&self, name: &str, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CommandError>> + Send + 'static,
    {
        self.register(name, FnCommand { f });
    }

    /// Register an async closure over a deserialized payload.
    pub fn register_typed<P, F, Fut>(&self, name: &str, f: F)
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CommandError>> + Send + 'static,
    {
        self.register(
            name,
            TypedCommand {
                f,
                _marker: std::marker::PhantomData,
            },
        );
    }

    /// Remove the handler for `name`. Returns whether one was registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.handlers.write().remove(name).is_some()
    }

    /// Check whether a handler is registered for `name`.
    pub fn has_command(&self, name: &str) -> bool {
        self.handlers.read().contains_key(name)
    }

    /// Registered command names (sorted).
    pub fn commands(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Deliver a command to its handler.
    pub async fn dispatch(&self, command: LegacyCommand) -> CommandOutcome {
        let LegacyCommand { name, payload } = command;
        counter!("legacy_commands_total", "command" => name.clone()).increment(1);

        let handler = self.handlers.read().get(&name).cloned();
        let Some(handler) = handler else {
            debug!(command = %name, "no handler for legacy command, dropping");
            return CommandOutcome::Unhandled;
        };

        match AssertUnwindSafe(handler.handle(payload)).catch_unwind().await {
            Ok(Ok(())) => {
                debug!(command = %name, "legacy command handled");
                CommandOutcome::Handled
            }
            Ok(Err(e)) => {
                warn!(command = %name, error = %e, "legacy command handler failed");
                counter!("legacy_command_errors_total", "command" => name).increment(1);
                CommandOutcome::Failed(e.to_string())
            }
            Err(_) => {
                warn!(command = %name, "legacy command handler panicked");
                counter!("legacy_command_errors_total", "command" => name).increment(1);
                CommandOutcome::Failed("handler panicked".into())
            }
        }
    }
}
