//! Built-in UI handlers.
//!
//! The console has no real UI in this process; handlers track the state a
//! UI would show (current route, open file, last notification) and log what
//! they were asked to do.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_client::catalog::{inbound, legacy};
use tether_rpc::{CommandBus, CommandError, HandlerError, HandlerRegistry};
use tracing::info;

/// What the console is currently showing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiContext {
    /// Current route.
    pub route: String,
    /// Workspace file open in the editor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_file: Option<String>,
    /// Most recent notification text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_notification: Option<String>,
}

/// Shared UI state mutated by handlers.
#[derive(Default)]
pub struct UiState {
    context: RwLock<UiContext>,
}

impl UiState {
    /// State starting on `route`.
    pub fn new(route: impl Into<String>) -> Self {
        Self {
            context: RwLock::new(UiContext {
                route: route.into(),
                ..UiContext::default()
            }),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> UiContext {
        self.context.read().clone()
    }

    fn navigate(&self, path: String) {
        info!(path = %path, "navigating");
        self.context.write().route = path;
    }

    fn open_file(&self, path: String) {
        info!(path = %path, "opening workspace file");
        self.context.write().open_file = Some(path);
    }

    fn notify(&self, message: String, level: Option<&str>) {
        info!(level = level.unwrap_or("info"), message = %message, "notification");
        self.context.write().last_notification = Some(message);
    }
}

#[derive(Deserialize)]
struct PathParams {
    path: String,
}

#[derive(Deserialize)]
struct NotificationParams {
    message: String,
    #[serde(default)]
    level: Option<String>,
}

/// Register the inbound RPC methods and legacy commands.
pub fn register_all(registry: &HandlerRegistry, commands: &CommandBus, state: &Arc<UiState>) {
    let s = state.clone();
    registry.register_fn(inbound::GET_UI_CONTEXT, move |_| {
        let s = s.clone();
        async move {
            serde_json::to_value(s.snapshot()).map_err(|e| HandlerError::from_error(&e))
        }
    });

    let s = state.clone();
    registry.register_typed(inbound::NAVIGATE_TO_PAGE, move |p: PathParams| {
        let s = s.clone();
        async move {
            s.navigate(p.path);
            Ok::<_, HandlerError>(serde_json::json!({ "navigated": true }))
        }
    });

    let s = state.clone();
    registry.register_typed(inbound::OPEN_WORKSPACE_FILE, move |p: PathParams| {
        let s = s.clone();
        async move {
            if p.path.trim().is_empty() {
                return Err(HandlerError::invalid_params("path must not be empty"));
            }
            s.open_file(p.path);
            Ok::<_, HandlerError>(serde_json::json!({ "opened": true }))
        }
    });

    let s = state.clone();
    registry.register_typed(inbound::SHOW_NOTIFICATION, move |p: NotificationParams| {
        let s = s.clone();
        async move {
            s.notify(p.message, p.level.as_deref());
            Ok::<_, HandlerError>(Value::Null)
        }
    });

    let s = state.clone();
    commands.register_typed(legacy::NAVIGATE, move |p: PathParams| {
        let s = s.clone();
        async move {
            s.navigate(p.path);
            Ok::<_, CommandError>(())
        }
    });

    let s = state.clone();
    commands.register_typed(legacy::OPEN_FILE, move |p: PathParams| {
        let s = s.clone();
        async move {
            s.open_file(p.path);
            Ok::<_, CommandError>(())
        }
    });

    let s = state.clone();
    commands.register_typed(legacy::NOTIFICATION, move |p: NotificationParams| {
        let s = s.clone();
        async move {
            s.notify(p.message, p.level.as_deref());
            Ok::<_, CommandError>(())
        }
    });
}
