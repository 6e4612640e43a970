/// Activation orchestrator
///
/// Decides, per instance role and activation reason, whether a workflow's
/// webhooks and/or triggers and pollers are registered on this instance, and
/// queues retries when an activation fails.
///
/// Trigger and poll nodes report through two channels; [`ActiveWorkflowManager::start`]
/// spawns the loop that turns emitted data into executions and emitted errors
/// into deactivation, error workflow runs and re-activation.

use crate::{
    activation::{
        errors::ActivationErrorsService,
        instance::{InstanceSettings, PubSubCommand, Publisher},
        queue::{ActivationQueue, RetryAttempt},
    },
    config::Config,
    errors::{ActivationError, DeactivationError, ManagerError, WebhookPathTakenError},
    nodes::{builtin, NodeKind, WebhookNode},
    reporter::ErrorReporter,
    runtime::{
        active_workflows::ActiveWorkflows,
        context::{emit_channels, ContextFactory, EmitReceivers, EmitSource, EmittedData, EmittedError, Emitter},
        runner::{ErrorWorkflowRunner, FailedRun, WorkflowRunner},
        scheduler::ScheduledTaskManager,
    },
    webhooks::{resolve_workflow_webhooks, WebhookData, WebhookEntity, WebhookStore, WebhookStoreError},
    workflow::{
        graph::{WorkflowGraph, STARTING_NODES},
        node_types::NodeTypes,
        storage::WorkflowRepository,
        types::{ActivationMode, ExecutionMode, WorkflowRecord},
    },
};
use futures::{future::join_all, FutureExt};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, PoisonError, Weak},
    time::Duration,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Collaborators of the manager
pub struct ManagerDependencies {
    pub workflows: Arc<dyn WorkflowRepository>,
    pub webhooks: Arc<dyn WebhookStore>,
    pub node_types: Arc<NodeTypes>,
    pub instance: Arc<dyn InstanceSettings>,
    pub publisher: Arc<dyn Publisher>,
    pub scheduler: Arc<dyn ScheduledTaskManager>,
    pub runner: Arc<dyn WorkflowRunner>,
    pub error_workflows: Arc<dyn ErrorWorkflowRunner>,
    pub reporter: Arc<dyn ErrorReporter>,
}

/// Tunables of the manager
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Workflows activated in parallel on startup
    pub activation_batch_size: usize,
    pub reactivate_initial_timeout: Duration,
    pub reactivate_max_timeout: Duration,
}

impl ManagerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            activation_batch_size: config.workflows.activation_batch_size,
            reactivate_initial_timeout: config.activation.initial_timeout(),
            reactivate_max_timeout: config.activation.max_timeout(),
        }
    }
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            activation_batch_size: 1,
            reactivate_initial_timeout: Duration::from_secs(1),
            reactivate_max_timeout: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Why a webhook couldn't be registered
enum WebhookFailure {
    Store(WebhookStoreError),
    External(anyhow::Error),
}

pub struct ActiveWorkflowManager {
    workflows: Arc<dyn WorkflowRepository>,
    webhooks: Arc<dyn WebhookStore>,
    node_types: Arc<NodeTypes>,
    instance: Arc<dyn InstanceSettings>,
    publisher: Arc<dyn Publisher>,
    runner: Arc<dyn WorkflowRunner>,
    error_workflows: Arc<dyn ErrorWorkflowRunner>,
    reporter: Arc<dyn ErrorReporter>,
    active_workflows: ActiveWorkflows,
    activation_queue: ActivationQueue,
    activation_errors: ActivationErrorsService,
    emitter: Emitter,
    receivers: Mutex<Option<EmitReceivers>>,
    batch_size: usize,
    shutdown: CancellationToken,
    /// Handed to retry attempts so a queued timer doesn't keep the manager alive
    this: Weak<Self>,
}

impl ActiveWorkflowManager {
    pub fn new(deps: ManagerDependencies, options: ManagerOptions) -> Arc<Self> {
        let (emitter, receivers) = emit_channels();

        Arc::new_cyclic(|this| Self {
            active_workflows: ActiveWorkflows::new(deps.scheduler, Arc::clone(&deps.reporter)),
            workflows: deps.workflows,
            webhooks: deps.webhooks,
            node_types: deps.node_types,
            instance: deps.instance,
            publisher: deps.publisher,
            runner: deps.runner,
            error_workflows: deps.error_workflows,
            reporter: deps.reporter,
            activation_queue: ActivationQueue::new(options.reactivate_initial_timeout, options.reactivate_max_timeout),
            activation_errors: ActivationErrorsService::new(),
            emitter,
            receivers: Mutex::new(Some(receivers)),
            batch_size: options.activation_batch_size.max(1),
            shutdown: CancellationToken::new(),
            this: this.clone(),
        })
    }

    pub fn active_workflows(&self) -> &ActiveWorkflows {
        &self.active_workflows
    }

    pub fn activation_queue(&self) -> &ActivationQueue {
        &self.activation_queue
    }

    /// Spawn the loop consuming trigger and poll emissions
    ///
    /// Returns `None` when the loop was already started.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let receivers = self
            .receivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        let manager = Arc::clone(self);
        Some(tokio::spawn(async move { manager.run_event_loop(receivers).await }))
    }

    async fn run_event_loop(self: Arc<Self>, mut receivers: EmitReceivers) {
        tracing::debug!("Activation event loop started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                Some(data) = receivers.data.recv() => self.dispatch(data),
                Some(error) = receivers.errors.recv() => self.handle_emitted_error(error).await,
                else => break,
            }
        }
        tracing::debug!("Activation event loop stopped");
    }

    /// Activate every stored active workflow
    pub async fn init(&self) -> anyhow::Result<()> {
        self.add_active_workflows(ActivationMode::Init).await
    }

    /// Activate all stored active workflows in sequential batches
    ///
    /// Workflows inside a batch activate concurrently. A failing workflow never
    /// stops the others; it is reported and queued for retry instead.
    pub async fn add_active_workflows(&self, activation_mode: ActivationMode) -> anyhow::Result<()> {
        let workflows = self.workflows.get_all_active().await?;
        if workflows.is_empty() {
            return Ok(());
        }

        if self.instance.is_leader() {
            tracing::info!(" ================================");
            tracing::info!("   Start Active Workflows:");
            tracing::info!(" ================================");
        }

        for batch in workflows.chunks(self.batch_size) {
            join_all(
                batch
                    .iter()
                    .map(|workflow| self.activate_workflow(workflow.clone(), activation_mode)),
            )
            .await;
        }

        tracing::debug!("Finished activating workflows (startup)");
        Ok(())
    }

    async fn activate_workflow(&self, workflow: WorkflowRecord, activation_mode: ActivationMode) {
        let workflow_display = workflow.display();
        let workflow_id = workflow.id.clone();
        match self.add(&workflow_id, activation_mode, Some(workflow), false).await {
            Ok(true) => {
                tracing::info!("   - {}", workflow_display);
                tracing::info!("     => Started");
            }
            Ok(false) => {}
            Err(e) => {
                tracing::info!(
                    "     => ERROR: Workflow {} could not be activated on first try, keep on trying if not an auth issue",
                    workflow_display
                );
                tracing::info!("               {}", e);
                tracing::error!("Issue on initial workflow activation try of {} (startup)", workflow_display);
            }
        }
    }

    /// Register a workflow as active
    ///
    /// Returns whether an activation message should be displayed, which is
    /// only the case for startup activations that registered something.
    ///
    /// A failure is returned to the caller after it was recorded, reported,
    /// routed to the error workflow and (unless it is an authorization issue)
    /// queued for retry. The stored `active` flag is never touched.
    pub async fn add(
        &self,
        workflow_id: &str,
        activation_mode: ActivationMode,
        existing: Option<WorkflowRecord>,
        should_publish: bool,
    ) -> Result<bool, ManagerError> {
        let known = existing.clone();
        let result = self
            .activate_one(workflow_id, activation_mode, existing, should_publish)
            .await;

        if let Err(e) = &result {
            self.handle_activation_failure(workflow_id, activation_mode, known, e).await;
        }
        result
    }

    async fn handle_activation_failure(
        &self,
        workflow_id: &str,
        activation_mode: ActivationMode,
        known: Option<WorkflowRecord>,
        error: &ManagerError,
    ) {
        self.reporter.report(error, error.level(), Some(workflow_id));

        let workflow = match known {
            Some(workflow) => Some(workflow),
            None => self.workflows.find_by_id(workflow_id).await.ok().flatten(),
        };
        // Gone from storage: nothing to route and nothing to retry
        let Some(workflow) = workflow else {
            return;
        };

        let failed = FailedRun::new(&workflow, ExecutionMode::Internal, error.to_string()).with_node(failed_node(error));
        self.run_error_workflow(failed).await;

        if error.is_authorization_failure() {
            tracing::warn!("⚠️ Not retrying workflow {}: authorization failed", workflow.display());
            return;
        }
        self.queue_activation(workflow_id, activation_mode);
    }

    /// Activation without the failure follow-up; retry attempts use this directly
    async fn activate_one(
        &self,
        workflow_id: &str,
        activation_mode: ActivationMode,
        existing: Option<WorkflowRecord>,
        should_publish: bool,
    ) -> Result<bool, ManagerError> {
        if self.instance.is_multi_main() && !self.instance.is_leader() && should_publish {
            self.publish(PubSubCommand::AddWebhooksTriggersAndPollers {
                workflow_id: workflow_id.to_string(),
            })
            .await;
            return Ok(false);
        }

        let should_add_webhooks = self.should_add_webhooks(activation_mode);
        let should_add_triggers_and_pollers = self.should_add_triggers_and_pollers();
        let display_activation_message =
            (should_add_webhooks || should_add_triggers_and_pollers) && activation_mode.is_startup();

        let result = self
            .try_add(
                workflow_id,
                activation_mode,
                existing,
                should_add_webhooks,
                should_add_triggers_and_pollers,
            )
            .await;

        match result {
            Ok(activated) => Ok(activated && display_activation_message),
            Err(e) => {
                self.activation_errors.register(workflow_id, &e.to_string());
                Err(e)
            }
        }
    }

    /// Returns false when the workflow was skipped
    async fn try_add(
        &self,
        workflow_id: &str,
        activation_mode: ActivationMode,
        existing: Option<WorkflowRecord>,
        should_add_webhooks: bool,
        should_add_triggers_and_pollers: bool,
    ) -> Result<bool, ManagerError> {
        let record = match existing {
            Some(record) => record,
            None => self.workflows.find_by_id(workflow_id).await?.ok_or_else(|| {
                ActivationError::warning(format!("Failed to find workflow with ID \"{workflow_id}\""))
            })?,
        };

        if activation_mode.is_startup() && !record.active {
            tracing::debug!("Skipping workflow {} as it is no longer active", record.display());
            return Ok(false);
        }

        tracing::debug!("Initializing active workflow {} ({})", record.display(), activation_mode);

        let graph = WorkflowGraph::build(Arc::new(record), &self.node_types)?;

        if !graph.can_be_activated(&STARTING_NODES) {
            return Err(ActivationError::warning(format!(
                "Workflow {} has no node to start the workflow - at least one trigger, poller or webhook node is required",
                graph.record().display()
            ))
            .into());
        }

        if should_add_webhooks {
            self.add_webhooks(&graph, activation_mode).await?;
        }

        if should_add_triggers_and_pollers {
            self.add_triggers_and_pollers(&graph, ExecutionMode::Trigger, activation_mode)
                .await?;
        }

        // Activated, so nothing may be left in the retry queue
        self.activation_queue.remove(workflow_id);
        self.activation_errors.deregister(workflow_id);

        let trigger_count = graph.trigger_count(&[builtin::MANUAL_TRIGGER]);
        self.workflows.update_trigger_count(workflow_id, trigger_count).await?;

        Ok(true)
    }

    /// Whether this instance may write webhooks for an activation
    pub fn should_add_webhooks(&self, activation_mode: ActivationMode) -> bool {
        match activation_mode {
            // Populate the table on every start; rows surviving a restart are expected
            ActivationMode::Init => true,
            ActivationMode::LeadershipChange => false,
            _ => self.instance.is_leader(),
        }
    }

    /// Only the leader holds triggers and pollers, so they are never duplicated
    pub fn should_add_triggers_and_pollers(&self) -> bool {
        self.instance.is_leader()
    }

    /// Store the workflow's webhooks and make sure external services know them
    pub async fn add_webhooks(&self, graph: &WorkflowGraph, activation_mode: ActivationMode) -> Result<(), ManagerError> {
        let webhooks = resolve_workflow_webhooks(graph);
        if webhooks.is_empty() {
            return Ok(());
        }

        tracing::debug!("Adding webhooks for workflow {}", graph.record().display());

        for webhook in &webhooks {
            let entity = WebhookEntity::from_data(webhook);

            let Err(failure) = self.register_webhook(graph, webhook, &entity).await else {
                continue;
            };

            if activation_mode == ActivationMode::Init
                && matches!(failure, WebhookFailure::Store(WebhookStoreError::UniqueViolation { .. }))
            {
                // Rows are kept across restarts, so init collides with itself
                continue;
            }

            if let Err(e) = self.clear_webhooks(graph.id()).await {
                self.reporter.report(&e, e.level(), Some(graph.id()));
                tracing::error!(
                    "Could not remove webhooks of workflow \"{}\" because of error: \"{}\"",
                    graph.id(),
                    e
                );
            }

            return Err(match failure {
                WebhookFailure::Store(source @ WebhookStoreError::UniqueViolation { .. }) => WebhookPathTakenError {
                    node: entity.node.clone(),
                    source: source.into(),
                }
                .into(),
                WebhookFailure::Store(WebhookStoreError::Other(e)) | WebhookFailure::External(e) => e.into(),
            });
        }

        Ok(())
    }

    async fn register_webhook(
        &self,
        graph: &WorkflowGraph,
        webhook: &WebhookData,
        entity: &WebhookEntity,
    ) -> Result<(), WebhookFailure> {
        self.webhooks.store_webhook(entity).await.map_err(WebhookFailure::Store)?;

        let Some(node) = webhook_node(graph, &webhook.node) else {
            return Ok(());
        };
        let exists = node.check_exists(webhook).await.map_err(WebhookFailure::External)?;
        if !exists {
            node.create(webhook).await.map_err(WebhookFailure::External)?;
        }
        Ok(())
    }

    /// Deregister a workflow's webhooks externally and delete its webhook rows
    pub async fn clear_webhooks(&self, workflow_id: &str) -> Result<(), ManagerError> {
        let record = self
            .workflows
            .find_by_id(workflow_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Could not find workflow \"{}\"", workflow_id))?;
        let graph = WorkflowGraph::build(Arc::new(record), &self.node_types)?;

        for webhook in resolve_workflow_webhooks(&graph) {
            if let Some(node) = webhook_node(&graph, &webhook.node) {
                node.delete(&webhook).await?;
            }
        }

        self.webhooks
            .delete_workflow_webhooks(workflow_id)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(())
    }

    async fn add_triggers_and_pollers(
        &self,
        graph: &WorkflowGraph,
        execution_mode: ExecutionMode,
        activation_mode: ActivationMode,
    ) -> Result<(), ActivationError> {
        if !graph.has_triggers_or_pollers() {
            return Ok(());
        }

        tracing::debug!("Adding triggers and pollers for workflow {}", graph.record().display());

        let contexts = ContextFactory::new(Arc::clone(graph.record()), self.emitter.clone());
        self.active_workflows
            .add(graph, execution_mode, activation_mode, &contexts)
            .await?;

        tracing::debug!("Workflow {} activated", graph.record().display());
        Ok(())
    }

    /// Make a workflow inactive
    ///
    /// In multi-main setups the webhooks are cleared here and every instance
    /// is told to drop its triggers and pollers.
    pub async fn remove(&self, workflow_id: &str) -> Result<(), ManagerError> {
        self.clear_webhooks_best_effort(workflow_id).await;

        if self.instance.is_multi_main() {
            self.publish(PubSubCommand::RemoveTriggersAndPollers {
                workflow_id: workflow_id.to_string(),
            })
            .await;
            return Ok(());
        }

        self.activation_errors.deregister(workflow_id);
        self.activation_queue.remove(workflow_id);
        self.remove_workflow_triggers_and_pollers(workflow_id).await?;
        Ok(())
    }

    async fn clear_webhooks_best_effort(&self, workflow_id: &str) {
        if let Err(e) = self.clear_webhooks(workflow_id).await {
            self.reporter.report(&e, e.level(), Some(workflow_id));
            tracing::error!(
                "Could not remove webhooks of workflow \"{}\" because of error: \"{}\"",
                workflow_id,
                e
            );
        }
    }

    /// Stop running triggers and pollers of a workflow
    pub async fn remove_workflow_triggers_and_pollers(&self, workflow_id: &str) -> Result<(), DeactivationError> {
        if !self.active_workflows.is_active(workflow_id) {
            return Ok(());
        }

        if self.active_workflows.remove(workflow_id).await? {
            tracing::debug!("Removed triggers and pollers for workflow \"{}\"", workflow_id);
        }
        Ok(())
    }

    /// Deactivate everything in memory and everything stored as active
    pub async fn remove_all(&self) -> anyhow::Result<()> {
        tracing::debug!("Call to remove all active workflows received (removeAll)");

        let mut seen = HashSet::new();
        let mut workflow_ids = self.active_workflows.all_active_workflows();
        workflow_ids.extend(
            self.workflows
                .get_all_active()
                .await?
                .into_iter()
                .map(|workflow| workflow.id),
        );
        workflow_ids.retain(|id| seen.insert(id.clone()));

        let results = join_all(workflow_ids.iter().map(|id| self.remove(id))).await;
        for (workflow_id, result) in workflow_ids.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!("⚠️ Failed to remove workflow {}: {}", workflow_id, e);
            }
        }
        Ok(())
    }

    /// Ids of the workflows with triggers or pollers registered here
    pub fn all_active_in_memory(&self) -> Vec<String> {
        self.active_workflows.all_active_workflows()
    }

    /// Whether the workflow is stored as active
    ///
    /// Not the same as having triggers in memory; see [`all_active_in_memory`](Self::all_active_in_memory).
    pub async fn is_active(&self, workflow_id: &str) -> anyhow::Result<bool> {
        Ok(self
            .workflows
            .find_by_id(workflow_id)
            .await?
            .is_some_and(|workflow| workflow.active))
    }

    pub fn get_all_workflow_activation_errors(&self) -> HashMap<String, String> {
        self.activation_errors.get_all()
    }

    pub fn clear_all_activation_errors(&self) {
        tracing::debug!("Clearing all activation errors");
        self.activation_errors.clear_all();
    }

    pub fn remove_activation_error(&self, workflow_id: &str) {
        self.activation_errors.deregister(workflow_id);
    }

    /// Apply a command published by another main instance
    pub async fn handle_command(&self, command: PubSubCommand) -> Result<(), ManagerError> {
        tracing::debug!("Received {} for workflow {}", command.name(), command.workflow_id());
        match command {
            PubSubCommand::AddWebhooksTriggersAndPollers { workflow_id } => {
                if !self.instance.is_leader() {
                    return Ok(());
                }
                self.add(&workflow_id, ActivationMode::Activate, None, false).await?;
            }
            PubSubCommand::RemoveTriggersAndPollers { workflow_id } => {
                self.activation_errors.deregister(&workflow_id);
                self.activation_queue.remove(&workflow_id);
                self.remove_workflow_triggers_and_pollers(&workflow_id).await?;
            }
        }
        Ok(())
    }

    /// This instance just became leader
    pub async fn on_leader_takeover(&self) -> anyhow::Result<()> {
        tracing::info!("👑 Leadership acquired, adding trigger- and poller-based workflows");
        self.add_active_workflows(ActivationMode::LeadershipChange).await
    }

    /// This instance is no longer leader
    pub async fn on_leader_stepdown(&self) {
        tracing::info!("Leadership lost, removing trigger- and poller-based workflows");
        self.active_workflows.remove_all().await;
        self.activation_queue.remove_all();
    }

    /// Stop the event loop and drop every trigger and poller registration
    pub async fn shutdown(&self) {
        tracing::info!("⏹️ Removing all trigger- and poller-based workflows");
        self.shutdown.cancel();
        self.activation_queue.remove_all();
        self.active_workflows.remove_all().await;
    }

    /// Keep retrying the activation until it succeeds or the workflow is removed
    fn queue_activation(&self, workflow_id: &str, activation_mode: ActivationMode) {
        let manager = self.this.clone();
        let attempt: RetryAttempt = Arc::new(move |workflow_id: String, activation_mode: ActivationMode| {
            let manager = manager.clone();
            async move {
                let Some(manager) = manager.upgrade() else {
                    return Ok(());
                };
                let result = manager.activate_one(&workflow_id, activation_mode, None, true).await;
                if let Err(e) = &result {
                    manager.reporter.report(e, e.level(), Some(&workflow_id));
                }
                result.map(|_| ())
            }
            .boxed()
        });
        self.activation_queue.enqueue(workflow_id, activation_mode, attempt);
    }

    fn dispatch(&self, data: EmittedData) {
        let runner = Arc::clone(&self.runner);
        tokio::spawn(async move {
            tracing::debug!(
                "Received event to trigger execution for workflow \"{}\"",
                data.workflow.name
            );
            let workflow_id = data.workflow.id.clone();
            if let Err(e) = runner.run(data).await {
                tracing::error!("❌ Failed to start execution of workflow {}: {}", workflow_id, e);
            }
        });
    }

    async fn handle_emitted_error(&self, error: EmittedError) {
        match error.source {
            EmitSource::Trigger => self.handle_trigger_failure(error).await,
            EmitSource::Poll => {
                let failed = FailedRun::new(&error.workflow, error.mode, error.message).with_node(Some(error.node.as_str()));
                self.run_error_workflow(failed).await;
            }
        }
    }

    /// A running trigger failed: deactivate, report and retry
    async fn handle_trigger_failure(&self, error: EmittedError) {
        let workflow = &error.workflow;
        tracing::info!(
            "The trigger node \"{}\" of workflow \"{}\" failed with the error: \"{}\". Will try to reactivate.",
            error.node,
            workflow.name,
            error.message
        );

        if let Err(e) = self.active_workflows.remove(&workflow.id).await {
            tracing::warn!("⚠️ {}", e);
        }
        self.activation_errors.register(&workflow.id, &error.message);

        let failed = FailedRun::new(
            workflow,
            error.mode,
            format!(
                "There was a problem with the trigger node \"{}\", for that reason did the workflow had to be deactivated",
                error.node
            ),
        )
        .with_node(Some(error.node.as_str()));
        self.run_error_workflow(failed).await;

        self.queue_activation(&workflow.id, error.activation);
    }

    async fn run_error_workflow(&self, failed: FailedRun) {
        let workflow_id = failed.workflow_id.clone();
        if let Err(e) = self.error_workflows.run_error_workflow(failed).await {
            tracing::warn!("⚠️ Could not run error workflow for workflow {}: {}", workflow_id, e);
        }
    }

    async fn publish(&self, command: PubSubCommand) {
        if let Err(e) = self.publisher.publish_command(command).await {
            tracing::warn!("⚠️ Failed to publish command: {}", e);
        }
    }
}

fn webhook_node(graph: &WorkflowGraph, node_name: &str) -> Option<Arc<dyn WebhookNode>> {
    match &graph.node(node_name)?.kind {
        Some(NodeKind::Webhook(node)) => Some(Arc::clone(node)),
        _ => None,
    }
}

fn failed_node(error: &ManagerError) -> Option<&str> {
    match error {
        ManagerError::Activation(e) => e.node(),
        ManagerError::WebhookPathTaken(e) => Some(e.node.as_str()),
        _ => None,
    }
}
