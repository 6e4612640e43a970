/// Webhook path rules
///
/// - dynamic paths (a `:param` segment) on nodes with a webhook id are served
///   under that id, so the id keeps the route stable when the node is renamed
/// - full paths are used verbatim
/// - everything else lives under `<workflow id>/<node name>/<path>`

use crate::{
    nodes::NodeKind,
    webhooks::{WebhookData, WebhookDescription},
    workflow::{graph::WorkflowGraph, types::Node},
};
use serde::{Deserialize, Serialize};

/// Row of the webhook table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEntity {
    pub workflow_id: String,
    /// Path without leading/trailing slash
    pub webhook_path: String,
    pub method: String,
    pub node: String,
    /// Set for dynamic paths only
    pub webhook_id: Option<String>,
    /// Segment count of a dynamic path, used for longest-prefix route matching
    pub path_length: Option<u32>,
}

impl WebhookEntity {
    pub fn from_data(data: &WebhookData) -> Self {
        let webhook_path = normalize(&data.path).to_string();
        let (webhook_id, path_length) = match &data.webhook_id {
            Some(id) if is_dynamic(&data.path) => {
                (Some(id.clone()), Some(webhook_path.split('/').count() as u32))
            }
            _ => (None, None),
        };

        Self {
            workflow_id: data.workflow_id.clone(),
            webhook_path,
            method: data.http_method.clone(),
            node: data.node.clone(),
            webhook_id,
            path_length,
        }
    }
}

/// Whether a path has a `:param` segment
pub fn is_dynamic(path: &str) -> bool {
    path.starts_with(':') || path.contains("/:")
}

/// Strip one leading and one trailing slash
pub fn normalize(path: &str) -> &str {
    let path = path.strip_prefix('/').unwrap_or(path);
    path.strip_suffix('/').unwrap_or(path)
}

/// Resolve the served path for a node's webhook
pub fn node_webhook_path(workflow_id: &str, node: &Node, description: &WebhookDescription) -> String {
    let path = normalize(&description.path);

    match &node.webhook_id {
        Some(webhook_id) if is_dynamic(path) => format!("{webhook_id}/{path}"),
        _ if description.is_full_path => path.to_string(),
        _ => format!(
            "{workflow_id}/{}/{path}",
            encode_uri_component(&node.name.to_lowercase())
        ),
    }
}

/// All webhooks of the enabled webhook nodes of a workflow
pub fn resolve_workflow_webhooks(workflow: &WorkflowGraph) -> Vec<WebhookData> {
    let mut webhooks = Vec::new();

    for graph_node in workflow.nodes() {
        let node = &graph_node.node;
        let Some(NodeKind::Webhook(webhook_node)) = &graph_node.kind else {
            continue;
        };
        if node.disabled {
            continue;
        }

        for description in webhook_node.webhooks(node) {
            webhooks.push(WebhookData {
                workflow_id: workflow.id().to_string(),
                node: node.name.clone(),
                http_method: description.http_method.clone(),
                path: node_webhook_path(workflow.id(), node, &description),
                webhook_id: node.webhook_id.clone(),
            });
        }
    }

    webhooks
}

/// Percent-encode everything outside `A-Z a-z 0-9 - _ . ! ~ * ' ( )`
fn encode_uri_component(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'!' | b'~' | b'*' | b'\'' | b'(' | b')' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}
