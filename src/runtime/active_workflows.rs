/// In-memory registry of running triggers and pollers
///
/// Owns every long-lived registration this instance holds: the close handles
/// returned by trigger nodes and the cron jobs of poll nodes. Webhooks are
/// stateless and never land here.

use crate::{
    errors::{ActivationError, CloseError, DeactivationError},
    nodes::{NodeKind, PollNode, TriggerResponse},
    reporter::ErrorReporter,
    runtime::{
        context::{ContextFactory, PollContext},
        poll_times,
        scheduler::{ScheduledTask, ScheduledTaskManager},
    },
    workflow::{
        graph::{GraphNode, WorkflowGraph},
        types::{ActivationMode, ExecutionMode},
    },
};
use futures::FutureExt;
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use uuid::Uuid;

/// Registrations of one workflow
#[derive(Debug, Default)]
pub struct ActiveWorkflowEntry {
    /// Trigger handles, in activation order
    pub trigger_responses: Vec<TriggerResponse>,
    /// Poll node name -> cron job handles
    pub poll_handles: HashMap<String, Vec<Uuid>>,
}

/// Read-only summary of an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveWorkflowInfo {
    pub workflow_id: String,
    pub triggers: usize,
    pub poll_nodes: Vec<String>,
    pub poll_tasks: usize,
}

/// Registry of active trigger and poll registrations
pub struct ActiveWorkflows {
    entries: Mutex<HashMap<String, ActiveWorkflowEntry>>,
    scheduler: Arc<dyn ScheduledTaskManager>,
    reporter: Arc<dyn ErrorReporter>,
}

impl ActiveWorkflows {
    pub fn new(scheduler: Arc<dyn ScheduledTaskManager>, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            scheduler,
            reporter,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, ActiveWorkflowEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_active(&self, workflow_id: &str) -> bool {
        self.entries().contains_key(workflow_id)
    }

    pub fn get(&self, workflow_id: &str) -> Option<ActiveWorkflowInfo> {
        self.entries().get(workflow_id).map(|entry| {
            let mut poll_nodes: Vec<String> = entry.poll_handles.keys().cloned().collect();
            poll_nodes.sort();
            ActiveWorkflowInfo {
                workflow_id: workflow_id.to_string(),
                triggers: entry.trigger_responses.len(),
                poll_nodes,
                poll_tasks: entry.poll_handles.values().map(Vec::len).sum(),
            }
        })
    }

    /// Ids of every registered workflow, sorted
    pub fn all_active_workflows(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Start every enabled trigger and poller of a workflow
    ///
    /// All-or-nothing: if any node fails, whatever this call already started is
    /// stopped again before the error is returned. A workflow that is already
    /// registered is removed first.
    pub async fn add(
        &self,
        graph: &WorkflowGraph,
        mode: ExecutionMode,
        activation: ActivationMode,
        contexts: &ContextFactory,
    ) -> Result<(), ActivationError> {
        let workflow_id = graph.id().to_string();

        if self.is_active(&workflow_id) {
            tracing::debug!("Workflow {} is already registered, replacing it", workflow_id);
            if let Err(e) = self.remove(&workflow_id).await {
                tracing::warn!("⚠️ {}", e);
            }
        }

        let mut entry = ActiveWorkflowEntry::default();

        for graph_node in graph.trigger_nodes() {
            let Some(NodeKind::Trigger(trigger)) = &graph_node.kind else {
                continue;
            };
            let ctx = contexts.trigger_context(&graph_node.node, mode, activation);
            match trigger.trigger(ctx).await {
                Ok(response) => entry.trigger_responses.push(response),
                Err(e) => {
                    self.unwind(&workflow_id, entry).await;
                    return Err(activation_failure(graph_node, e));
                }
            }
        }

        for graph_node in graph.poll_nodes() {
            let Some(NodeKind::Poll(poller)) = &graph_node.kind else {
                continue;
            };
            let ctx = contexts.poll_context(&graph_node.node, mode, activation);
            match self.activate_polling(&workflow_id, Arc::clone(poller), ctx).await {
                Ok(handles) => {
                    entry.poll_handles.insert(graph_node.node.name.clone(), handles);
                }
                Err(PollActivationError { error, handles }) => {
                    entry.poll_handles.insert(graph_node.node.name.clone(), handles);
                    self.unwind(&workflow_id, entry).await;
                    return Err(activation_failure(graph_node, error));
                }
            }
        }

        tracing::debug!(
            "Registered {} trigger(s) and {} poller(s) for workflow {}",
            entry.trigger_responses.len(),
            entry.poll_handles.len(),
            workflow_id
        );
        self.entries().insert(workflow_id, entry);
        Ok(())
    }

    /// Validate schedules, poll once, then register the recurring poll
    async fn activate_polling(
        &self,
        workflow_id: &str,
        poller: Arc<dyn PollNode>,
        ctx: PollContext,
    ) -> Result<Vec<Uuid>, PollActivationError> {
        let times = poller.poll_times(ctx.node()).map_err(PollActivationError::from)?;
        let expressions: Vec<String> = times.iter().map(|time| time.to_cron_expression()).collect();
        for expression in &expressions {
            poll_times::validate_poll_expression(expression)
                .map_err(|e| PollActivationError::from(anyhow::Error::new(e)))?;
        }

        // Smoke test: a failing first poll fails the activation
        if let Some(data) = poller.poll(&ctx).await.map_err(PollActivationError::from)? {
            ctx.emit(data);
        }

        let task: ScheduledTask = {
            let ctx = ctx.clone();
            Arc::new(move || {
                let poller = Arc::clone(&poller);
                let ctx = ctx.clone();
                async move {
                    match poller.poll(&ctx).await {
                        Ok(Some(data)) => {
                            ctx.emit(data);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            ctx.emit_error(e.to_string());
                        }
                    }
                }
                .boxed()
            })
        };

        let mut handles = Vec::with_capacity(expressions.len());
        for expression in &expressions {
            match self.scheduler.register_cron(workflow_id, expression, Arc::clone(&task)).await {
                Ok(handle) => handles.push(handle),
                Err(error) => return Err(PollActivationError { error, handles }),
            }
        }
        Ok(handles)
    }

    /// Stop whatever a failed `add` managed to start
    async fn unwind(&self, workflow_id: &str, entry: ActiveWorkflowEntry) {
        tracing::debug!("Unwinding partial activation of workflow {}", workflow_id);
        if let Err(e) = self.close_entry(workflow_id, entry).await {
            tracing::warn!("⚠️ {}", e);
        }
    }

    /// Stop a workflow's triggers and pollers
    ///
    /// Returns `false` when nothing was registered. The entry is gone even when
    /// a trigger fails to close.
    pub async fn remove(&self, workflow_id: &str) -> Result<bool, DeactivationError> {
        let Some(entry) = self.entries().remove(workflow_id) else {
            return Ok(false);
        };

        self.close_entry(workflow_id, entry).await?;
        tracing::debug!("Removed triggers and pollers of workflow {}", workflow_id);
        Ok(true)
    }

    async fn close_entry(&self, workflow_id: &str, entry: ActiveWorkflowEntry) -> Result<(), DeactivationError> {
        for handle in entry.poll_handles.values().flatten() {
            if let Err(e) = self.scheduler.deregister(handle).await {
                tracing::warn!("⚠️ Failed to deregister poll task {} of workflow {}: {}", handle, workflow_id, e);
            }
        }

        let mut first_error = None;
        for response in entry.trigger_responses {
            let Some(close) = response.close else {
                continue;
            };
            match close().await {
                Ok(()) => {}
                Err(CloseError::Recoverable(e)) => {
                    self.reporter.report(&e, e.level, Some(workflow_id));
                }
                Err(CloseError::Fatal(e)) => {
                    tracing::error!("❌ Failed to close trigger of workflow {}: {}", workflow_id, e);
                    first_error.get_or_insert_with(|| DeactivationError {
                        workflow_id: workflow_id.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Remove every registered workflow
    pub async fn remove_all(&self) {
        for workflow_id in self.all_active_workflows() {
            if let Err(e) = self.remove(&workflow_id).await {
                tracing::warn!("⚠️ {}", e);
            }
        }
    }
}

/// Poll activation failure, with the jobs registered before it
struct PollActivationError {
    error: anyhow::Error,
    handles: Vec<Uuid>,
}

impl From<anyhow::Error> for PollActivationError {
    fn from(error: anyhow::Error) -> Self {
        Self {
            error,
            handles: Vec::new(),
        }
    }
}

fn activation_failure(graph_node: &GraphNode, cause: anyhow::Error) -> ActivationError {
    ActivationError::new(format!("There was a problem activating the workflow: \"{cause}\""))
        .with_node(graph_node.node.name.clone())
        .with_cause(cause)
}
