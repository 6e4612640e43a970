/// Contexts handed to trigger and poll nodes
///
/// Nodes never call back into the activation manager directly. Whatever they
/// produce leaves through two channels owned by the manager: one carrying data
/// that should start an execution and one carrying errors.

use crate::workflow::types::{ActivationMode, ExecutionMode, Node, WorkflowRecord};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Which kind of node produced an emission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitSource {
    Trigger,
    Poll,
}

/// Items produced by a trigger or poll that should start a run
#[derive(Debug, Clone)]
pub struct EmittedData {
    pub workflow: Arc<WorkflowRecord>,
    pub node: String,
    pub source: EmitSource,
    pub mode: ExecutionMode,
    pub activation: ActivationMode,
    pub data: Vec<Value>,
}

/// A failure reported by a running trigger or a scheduled poll
#[derive(Debug, Clone)]
pub struct EmittedError {
    pub workflow: Arc<WorkflowRecord>,
    pub node: String,
    pub source: EmitSource,
    pub mode: ExecutionMode,
    pub activation: ActivationMode,
    pub message: String,
}

/// Sending half of the data and error channels
#[derive(Debug, Clone)]
pub struct Emitter {
    data_tx: mpsc::UnboundedSender<EmittedData>,
    error_tx: mpsc::UnboundedSender<EmittedError>,
}

/// Receiving half of the data and error channels
#[derive(Debug)]
pub struct EmitReceivers {
    pub data: mpsc::UnboundedReceiver<EmittedData>,
    pub errors: mpsc::UnboundedReceiver<EmittedError>,
}

/// Create a connected emitter / receivers pair
pub fn emit_channels() -> (Emitter, EmitReceivers) {
    let (data_tx, data) = mpsc::unbounded_channel();
    let (error_tx, errors) = mpsc::unbounded_channel();
    (Emitter { data_tx, error_tx }, EmitReceivers { data, errors })
}

/// Per-node context for a trigger or poll
#[derive(Debug, Clone)]
pub struct NodeContext {
    workflow: Arc<WorkflowRecord>,
    node: Node,
    source: EmitSource,
    mode: ExecutionMode,
    activation: ActivationMode,
    emitter: Emitter,
}

pub type TriggerContext = NodeContext;
pub type PollContext = NodeContext;

impl NodeContext {
    pub fn workflow(&self) -> &WorkflowRecord {
        &self.workflow
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow.id
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn activation(&self) -> ActivationMode {
        self.activation
    }

    /// Shorthand for a node parameter lookup
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.node.parameter(name)
    }

    /// Hand produced items to the manager; returns false once it stopped listening
    pub fn emit(&self, data: Vec<Value>) -> bool {
        let sent = self
            .emitter
            .data_tx
            .send(EmittedData {
                workflow: Arc::clone(&self.workflow),
                node: self.node.name.clone(),
                source: self.source,
                mode: self.mode,
                activation: self.activation,
                data,
            })
            .is_ok();
        if !sent {
            tracing::debug!("Dropped emission from node '{}': manager is gone", self.node.name);
        }
        sent
    }

    /// Report a failure of the running trigger or poll
    pub fn emit_error(&self, message: impl Into<String>) -> bool {
        self.emitter
            .error_tx
            .send(EmittedError {
                workflow: Arc::clone(&self.workflow),
                node: self.node.name.clone(),
                source: self.source,
                mode: self.mode,
                activation: self.activation,
                message: message.into(),
            })
            .is_ok()
    }
}

/// Builds trigger and poll contexts for one workflow activation
#[derive(Debug, Clone)]
pub struct ContextFactory {
    workflow: Arc<WorkflowRecord>,
    emitter: Emitter,
}

impl ContextFactory {
    pub fn new(workflow: Arc<WorkflowRecord>, emitter: Emitter) -> Self {
        Self { workflow, emitter }
    }

    pub fn trigger_context(&self, node: &Node, mode: ExecutionMode, activation: ActivationMode) -> TriggerContext {
        self.context(node, EmitSource::Trigger, mode, activation)
    }

    pub fn poll_context(&self, node: &Node, mode: ExecutionMode, activation: ActivationMode) -> PollContext {
        self.context(node, EmitSource::Poll, mode, activation)
    }

    fn context(&self, node: &Node, source: EmitSource, mode: ExecutionMode, activation: ActivationMode) -> NodeContext {
        NodeContext {
            workflow: Arc::clone(&self.workflow),
            node: node.clone(),
            source,
            mode,
            activation,
            emitter: self.emitter.clone(),
        }
    }
}
