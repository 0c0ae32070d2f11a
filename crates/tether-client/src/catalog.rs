//! Method and event names exchanged with the backend.

use std::time::Duration;

/// An outbound method with its default timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MethodSpec {
    /// Wire method name.
    pub name: &'static str,
    /// Timeout used by [`crate::RpcClient::call_method`].
    pub timeout: Duration,
}

impl MethodSpec {
    const fn new(name: &'static str, secs: u64) -> Self {
        Self {
            name,
            timeout: Duration::from_secs(secs),
        }
    }

    /// Find a catalog entry by wire name.
    pub fn lookup(name: &str) -> Option<&'static MethodSpec> {
        OUTBOUND.iter().find(|spec| spec.name == name)
    }
}

/// Run an assistant and persist its output. Long-running.
pub const EXECUTE_ASSISTANT_WITH_SAVE: MethodSpec = MethodSpec::new("executeAssistantWithSave", 60);
/// Persist a search result to the workspace.
pub const SAVE_SEARCH_RESULT: MethodSpec = MethodSpec::new("saveSearchResult", 30);
/// Read one workspace file.
pub const LOAD_WORKSPACE_FILE: MethodSpec = MethodSpec::new("loadWorkspaceFile", 30);
/// List files in a workspace directory.
pub const LIST_WORKSPACE_FILES: MethodSpec = MethodSpec::new("listWorkspaceFiles", 30);

/// Every outbound method the client knows.
pub const OUTBOUND: &[MethodSpec] = &[
    EXECUTE_ASSISTANT_WITH_SAVE,
    SAVE_SEARCH_RESULT,
    LOAD_WORKSPACE_FILE,
    LIST_WORKSPACE_FILES,
];

/// Methods the backend calls on the client.
pub mod inbound {
    /// Report the current route and selection.
    pub const GET_UI_CONTEXT: &str = "getUiContext";
    /// Move the console to another page.
    pub const NAVIGATE_TO_PAGE: &str = "navigateToPage";
    /// Open a workspace file in the editor.
    pub const OPEN_WORKSPACE_FILE: &str = "openWorkspaceFile";
    /// Show a toast.
    pub const SHOW_NOTIFICATION: &str = "showNotification";

    /// All inbound methods.
    pub const ALL: &[&str] = &[
        GET_UI_CONTEXT,
        NAVIGATE_TO_PAGE,
        OPEN_WORKSPACE_FILE,
        SHOW_NOTIFICATION,
    ];
}

/// One-way events of the older protocol.
pub mod legacy {
    /// Route change.
    pub const NAVIGATE: &str = "navigate";
    /// Open a file.
    pub const OPEN_FILE: &str = "open-file";
    /// Toast.
    pub const NOTIFICATION: &str = "notification";

    /// All legacy events.
    pub const ALL: &[&str] = &[NAVIGATE, OPEN_FILE, NOTIFICATION];
}
