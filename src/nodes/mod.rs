/// Node type capabilities
///
/// A node type is resolved once, at registry lookup time, into a [`NodeKind`]:
/// - Trigger: non-HTTP, long-lived (schedules, queue listeners)
/// - Poll: checked on a cron schedule for new items
/// - Webhook: HTTP entry point, registered in the webhook store
/// - Action: everything else; never starts a run on its own

// Built-in node types
pub mod builtin;

use crate::{
    errors::CloseError,
    runtime::{
        context::{PollContext, TriggerContext},
        poll_times::{self, TriggerTime},
    },
    webhooks::{WebhookData, WebhookDescription},
    workflow::types::Node,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::{fmt, future::Future, sync::Arc};

pub type CloseFuture = BoxFuture<'static, Result<(), CloseError>>;
pub type CloseFunction = Box<dyn FnOnce() -> CloseFuture + Send + Sync>;

/// Handle returned by a trigger activation
#[derive(Default)]
pub struct TriggerResponse {
    /// Stops the trigger; called once on deactivation
    pub close: Option<CloseFunction>,
}

impl TriggerResponse {
    pub fn without_close() -> Self {
        Self { close: None }
    }

    pub fn with_close<F, Fut>(close: F) -> Self
    where
        F: FnOnce() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CloseError>> + Send + 'static,
    {
        Self {
            close: Some(Box::new(move || -> CloseFuture { Box::pin(close()) })),
        }
    }
}

impl fmt::Debug for TriggerResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerResponse")
            .field("close", &self.close.is_some())
            .finish()
    }
}

#[async_trait]
pub trait TriggerNode: Send + Sync {
    /// Start listening; data and failures go out through the context
    async fn trigger(&self, ctx: TriggerContext) -> anyhow::Result<TriggerResponse>;
}

#[async_trait]
pub trait PollNode: Send + Sync {
    /// Schedules for this node, read from its `pollTimes` parameter by default
    fn poll_times(&self, node: &Node) -> anyhow::Result<Vec<TriggerTime>> {
        poll_times::from_node(node)
    }

    /// Check the external system once; `None` means nothing new
    async fn poll(&self, ctx: &PollContext) -> anyhow::Result<Option<Vec<Value>>>;
}

#[async_trait]
pub trait WebhookNode: Send + Sync {
    /// Webhooks this node listens on
    fn webhooks(&self, node: &Node) -> Vec<WebhookDescription>;

    /// Whether the external service already knows this webhook
    async fn check_exists(&self, _webhook: &WebhookData) -> anyhow::Result<bool> {
        Ok(true)
    }

    /// Register the webhook with the external service
    async fn create(&self, _webhook: &WebhookData) -> anyhow::Result<()> {
        Ok(())
    }

    /// Remove the webhook from the external service
    async fn delete(&self, _webhook: &WebhookData) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Capability of a node type
#[derive(Clone)]
pub enum NodeKind {
    Trigger(Arc<dyn TriggerNode>),
    Poll(Arc<dyn PollNode>),
    Webhook(Arc<dyn WebhookNode>),
    Action,
}

impl NodeKind {
    /// Whether nodes of this kind can start a workflow
    pub fn can_start(&self) -> bool {
        !matches!(self, NodeKind::Action)
    }

    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Trigger(_) => "trigger",
            NodeKind::Poll(_) => "poll",
            NodeKind::Webhook(_) => "webhook",
            NodeKind::Action => "action",
        }
    }
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Registered node type
#[derive(Debug, Clone)]
pub struct NodeTypeDescriptor {
    pub name: String,
    pub version: u32,
    pub kind: NodeKind,
}

impl NodeTypeDescriptor {
    pub fn new(name: impl Into<String>, version: u32, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            version,
            kind,
        }
    }
}
