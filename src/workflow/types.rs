/// Core workflow type definitions
///
/// Defines the persisted workflow record (nodes, connections, settings) and the
/// execution/activation mode enums shared by the activation subsystem.
/// These types are serialized/deserialized from JSON for persistence.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A stored workflow definition
///
/// Records are owned by workflow storage; the activation subsystem only reads them
/// (and writes back the trigger count). `active` is the persisted "should run
/// continuously" flag, which is independent of what is registered in memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    /// Unique workflow identifier (e.g., "wf-orders")
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    /// Persisted activation flag
    #[serde(default)]
    pub active: bool,
    /// Nodes of this workflow, unique by name
    pub nodes: Vec<Node>,
    /// Directed connections between nodes
    #[serde(default)]
    pub connections: Vec<Connection>,
    /// Per-workflow settings
    #[serde(default)]
    pub settings: WorkflowSettings,
}

impl WorkflowRecord {
    /// Label used in log lines, e.g. `"Orders" (ID: wf-orders)`
    pub fn display(&self) -> String {
        format!("\"{}\" (ID: {})", self.name, self.id)
    }
}

/// Workflow-level settings relevant to activation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSettings {
    /// Workflow to run when this one fails to activate or a trigger/poll fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_workflow: Option<String>,
}

/// A single node in the workflow graph
///
/// `node_type` plus `type_version` select the node type descriptor from the
/// node type registry, which decides whether the node is a trigger, poller,
/// webhook or plain action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Node name, unique within its workflow
    pub name: String,
    /// Node type name (e.g., "flowgate.webhook")
    #[serde(rename = "type")]
    pub node_type: String,
    /// Node type version
    #[serde(default = "default_type_version")]
    pub type_version: u32,
    /// Disabled nodes never start a run
    #[serde(default)]
    pub disabled: bool,
    /// Node-specific configuration as flexible JSON
    #[serde(default)]
    pub parameters: Value,
    /// Stable external id used for webhooks with dynamic path segments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<String>,
}

fn default_type_version() -> u32 {
    1
}

impl Node {
    pub fn new(name: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_type: node_type.into(),
            type_version: default_type_version(),
            disabled: false,
            parameters: Value::Object(Default::default()),
            webhook_id: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_webhook_id(mut self, webhook_id: impl Into<String>) -> Self {
        self.webhook_id = Some(webhook_id.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Look up a top-level parameter by name
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }
}

/// Connection between two nodes, by node name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    /// Source node name
    pub from: String,
    /// Target node name
    pub to: String,
}

/// How an execution was started
///
/// Only `Webhook` and `Trigger` executions are "production" executions and go
/// through admission control; everything else is internal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionMode {
    Cli,
    Error,
    Integrated,
    Internal,
    Manual,
    Retry,
    Trigger,
    Webhook,
}

impl ExecutionMode {
    /// Internal modes never consume admission slots
    pub fn is_internal(&self) -> bool {
        !matches!(self, ExecutionMode::Trigger | ExecutionMode::Webhook)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Cli => "cli",
            ExecutionMode::Error => "error",
            ExecutionMode::Integrated => "integrated",
            ExecutionMode::Internal => "internal",
            ExecutionMode::Manual => "manual",
            ExecutionMode::Retry => "retry",
            ExecutionMode::Trigger => "trigger",
            ExecutionMode::Webhook => "webhook",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a workflow is being activated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivationMode {
    /// Instance startup
    Init,
    Create,
    Update,
    /// Explicit user activation
    Activate,
    Manual,
    /// This instance just became leader
    LeadershipChange,
}

impl ActivationMode {
    /// Startup-style activations iterate over stored workflows rather than
    /// acting on an explicit request
    pub fn is_startup(&self) -> bool {
        matches!(self, ActivationMode::Init | ActivationMode::LeadershipChange)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationMode::Init => "init",
            ActivationMode::Create => "create",
            ActivationMode::Update => "update",
            ActivationMode::Activate => "activate",
            ActivationMode::Manual => "manual",
            ActivationMode::LeadershipChange => "leadershipChange",
        }
    }
}

impl fmt::Display for ActivationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
