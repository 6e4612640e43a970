/// Webhook registration
///
/// Webhooks are stateless HTTP registrations: activating one means writing a
/// row to the shared webhook table (and, for some node types, registering the
/// URL with a third-party service). No in-memory handle is kept.

// Path resolution and normalization rules
pub mod path;

// Persistent webhook table
pub mod store;

pub use path::{resolve_workflow_webhooks, WebhookEntity};
pub use store::{SqliteWebhookStore, WebhookStore, WebhookStoreError};

/// Webhook declared by a node type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookDescription {
    /// HTTP method, upper case
    pub http_method: String,
    /// Path as configured on the node; may contain `:param` segments
    pub path: String,
    /// Use `path` verbatim instead of prefixing it with workflow and node
    pub is_full_path: bool,
}

impl WebhookDescription {
    pub fn new(http_method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            http_method: http_method.into().to_uppercase(),
            path: path.into(),
            is_full_path: false,
        }
    }

    pub fn full_path(mut self) -> Self {
        self.is_full_path = true;
        self
    }
}

/// A webhook resolved for one node of one workflow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookData {
    pub workflow_id: String,
    /// Node name
    pub node: String,
    pub http_method: String,
    /// Fully resolved path (not yet stripped of surrounding slashes)
    pub path: String,
    /// The node's stable webhook id, if any
    pub webhook_id: Option<String>,
}
