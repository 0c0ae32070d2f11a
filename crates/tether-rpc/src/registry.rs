//! Method registry and inbound dispatch.
//!
//! Handlers are registered by method name (last writer wins) and may be
//! added or removed while the connection is live. [`Dispatcher::dispatch`]
//! turns every inbound request into exactly one response, whatever the
//! handler does: returns, errors, panics, or runs past the timeout.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use metrics::{counter, histogram};
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, error, instrument, warn};

use crate::errors::{self, HandlerError};
use crate::types::{RpcErrorObject, RpcNotification, RpcRequest, RpcResponse};

/// Default upper bound on a single handler run.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(60);

/// Handlers slower than this are logged.
const SLOW_HANDLER: Duration = Duration::from_secs(5);

/// Trait implemented by every inbound method handler.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Execute the handler with the request params.
    async fn handle(&self, params: Option<Value>) -> Result<Value, HandlerError>;
}

/// Adapter turning an async closure over raw params into a [`MethodHandler`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> MethodHandler for FnHandler<F>
where
    F: Fn(Option<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    async fn handle(&self, params: Option<Value>) -> Result<Value, HandlerError> {
        (self.f)(params).await
    }
}

/// Adapter that validates params into `P` and serializes the `R` result.
///
/// Params that fail to deserialize produce an invalid-params error
/// without invoking the closure.
pub struct TypedHandler<P, R, F> {
    f: F,
    _marker: PhantomData<fn(P) -> R>,
}

#[async_trait]
impl<P, R, F, Fut> MethodHandler for TypedHandler<P, R, F>
where
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(P) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, HandlerError>> + Send,
{
    async fn handle(&self, params: Option<Value>) -> Result<Value, HandlerError> {
        let params: P = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| HandlerError::invalid_params(format!("Invalid params: {e}")))?;
        let result = (self.f)(params).await?;
        serde_json::to_value(result)
            .map_err(|e| HandlerError::internal(format!("Failed to serialize result: {e}")))
    }
}

/// Registry mapping method names to handlers.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn MethodHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler, replacing any previous handler for `method`.
    pub fn register(&self, method: &str, handler: impl MethodHandler + 'static) {
        let previous = self
            .handlers
            .write()
            .insert(method.to_owned(), Arc::new(handler));
        if previous.is_some() {
            debug!(method, "replaced existing handler");
        }
    }

    /// Register an async closure over raw params.
    pub fn register_fn<F, Fut>(&self, method: &str, f: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.register(method, FnHandler { f });
    }

    /// Register an async closure with typed params and result.
    pub fn register_typed<P, R, F, Fut>(&self, method: &str, f: F)
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    {
        self.register(
            method,
            TypedHandler {
                f,
                _marker: PhantomData,
            },
        );
    }

    /// Remove the handler for `method`. Returns whether one was registered.
    pub fn unregister(&self, method: &str) -> bool {
        self.handlers.write().remove(method).is_some()
    }

    /// Look up the handler for `method`.
    pub fn get(&self, method: &str) -> Option<Arc<dyn MethodHandler>> {
        self.handlers.read().get(method).cloned()
    }

    /// Check whether a method is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.read().contains_key(method)
    }

    /// List all registered method names (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes inbound requests to registered handlers.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    handler_timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher over `registry` with the default handler timeout.
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }

    /// Override the handler timeout.
    #[must_use]
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// The registry this dispatcher reads from.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Dispatch a request. Always returns exactly one response carrying the
    /// request's id.
    #[instrument(skip_all, fields(method = %request.method, id = %request.id))]
    pub async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let RpcRequest {
            method, params, id, ..
        } = request;
        match self.invoke(&method, params).await {
            Ok(result) => RpcResponse::success(id, result),
            Err(error) => RpcResponse::failure(id, error),
        }
    }

    /// Run the handler for a notification and discard its outcome.
    #[instrument(skip_all, fields(method = %notification.method))]
    pub async fn notify(&self, notification: RpcNotification) {
        if let Err(error) = self.invoke(&notification.method, notification.params).await {
            warn!(code = error.code, message = %error.message, "notification handler failed");
        }
    }

    async fn invoke(&self, method: &str, params: Option<Value>) -> Result<Value, RpcErrorObject> {
        counter!("rpc_inbound_requests_total", "method" => method.to_owned()).increment(1);

        let Some(handler) = self.registry.get(method) else {
            counter!("rpc_inbound_errors_total", "method" => method.to_owned(), "error_type" => "method_not_found").increment(1);
            warn!(method, "no handler registered");
            return Err(RpcErrorObject::new(
                errors::METHOD_NOT_FOUND,
                format!("Method not found: {method}"),
            ));
        };

        let start = Instant::now();
        let run = AssertUnwindSafe(handler.handle(params)).catch_unwind();
        let result = match tokio::time::timeout(self.handler_timeout, run).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => {
                counter!("rpc_inbound_errors_total", "method" => method.to_owned(), "error_type" => "handler_error").increment(1);
                warn!(method, code = err.code(), error = %err, "handler returned error");
                Err(err.to_error_object())
            }
            Ok(Err(panic)) => {
                counter!("rpc_inbound_errors_total", "method" => method.to_owned(), "error_type" => "panic").increment(1);
                let detail = panic_message(panic.as_ref());
                error!(method, panic = %detail, "handler panicked");
                Err(RpcErrorObject::new(errors::INTERNAL_ERROR, "Handler panicked")
                    .with_data(json!({ "panic": detail })))
            }
            Err(_elapsed) => {
                counter!("rpc_inbound_errors_total", "method" => method.to_owned(), "error_type" => "timeout").increment(1);
                error!(method, "handler timed out after {:?}", self.handler_timeout);
                Err(RpcErrorObject::new(
                    errors::INTERNAL_ERROR,
                    format!("Handler for '{method}' timed out"),
                ))
            }
        };

        let duration = start.elapsed();
        histogram!("rpc_inbound_duration_seconds", "method" => method.to_owned())
            .record(duration.as_secs_f64());
        if duration >= SLOW_HANDLER {
            warn!(
                method,
                duration_secs = duration.as_secs_f64(),
                "slow inbound handler"
            );
        }

        result
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
