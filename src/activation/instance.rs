/// Instance role and cross-instance commands
///
/// In a multi-main deployment only the leader holds trigger and poll
/// registrations. Followers forward activation requests to it through
/// [`PubSubCommand`]s.

use crate::config::InstanceConfig;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

/// Role of this instance, read at call time
pub trait InstanceSettings: Send + Sync {
    fn is_leader(&self) -> bool;

    fn is_multi_main(&self) -> bool;

    fn is_follower(&self) -> bool {
        !self.is_leader()
    }
}

/// Process-local role, flipped by the leader election
#[derive(Debug)]
pub struct InstanceRole {
    multi_main: AtomicBool,
    leader: AtomicBool,
}

impl InstanceRole {
    pub fn new(multi_main: bool, leader: bool) -> Self {
        Self {
            multi_main: AtomicBool::new(multi_main),
            leader: AtomicBool::new(leader),
        }
    }

    /// Single-instance deployments are always leader
    pub fn from_config(config: &InstanceConfig) -> Self {
        Self::new(config.multi_main, config.leader || !config.multi_main)
    }

    pub fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
    }
}

impl InstanceSettings for InstanceRole {
    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    fn is_multi_main(&self) -> bool {
        self.multi_main.load(Ordering::SeqCst)
    }
}

/// Command sent between main instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "command",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum PubSubCommand {
    /// Ask the leader to activate a workflow
    AddWebhooksTriggersAndPollers { workflow_id: String },
    /// Ask every instance to drop a workflow's triggers and pollers
    RemoveTriggersAndPollers { workflow_id: String },
}

impl PubSubCommand {
    pub fn name(&self) -> &'static str {
        match self {
            PubSubCommand::AddWebhooksTriggersAndPollers { .. } => "add-webhooks-triggers-and-pollers",
            PubSubCommand::RemoveTriggersAndPollers { .. } => "remove-triggers-and-pollers",
        }
    }

    pub fn workflow_id(&self) -> &str {
        match self {
            PubSubCommand::AddWebhooksTriggersAndPollers { workflow_id }
            | PubSubCommand::RemoveTriggersAndPollers { workflow_id } => workflow_id,
        }
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish_command(&self, command: PubSubCommand) -> Result<()>;
}

/// In-process publisher over a broadcast channel
#[derive(Debug, Clone)]
pub struct LocalPublisher {
    sender: broadcast::Sender<PubSubCommand>,
}

impl LocalPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PubSubCommand> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl Publisher for LocalPublisher {
    async fn publish_command(&self, command: PubSubCommand) -> Result<()> {
        tracing::debug!("📣 Publishing {} for workflow {}", command.name(), command.workflow_id());
        if self.sender.send(command).is_err() {
            tracing::debug!("No subscribers for published command");
        }
        Ok(())
    }
}
