/// Execution hand-off
///
/// The activation subsystem doesn't execute workflows itself. Data produced
/// by triggers and pollers goes to a [`WorkflowRunner`]; activation failures
/// go to an [`ErrorWorkflowRunner`] as synthetic failed runs.

use crate::{
    concurrency::ConcurrencyControlService,
    runtime::context::EmittedData,
    workflow::types::{ExecutionMode, WorkflowRecord},
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A failure routed to a workflow's error workflow
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedRun {
    pub workflow_id: String,
    pub workflow_name: String,
    /// Configured error workflow, if any
    pub error_workflow: Option<String>,
    pub mode: ExecutionMode,
    /// Node that failed, when known
    pub node: Option<String>,
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

impl FailedRun {
    pub fn new(workflow: &WorkflowRecord, mode: ExecutionMode, message: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow.id.clone(),
            workflow_name: workflow.name.clone(),
            error_workflow: workflow.settings.error_workflow.clone(),
            mode,
            node: None,
            message: message.into(),
            failed_at: Utc::now(),
        }
    }

    pub fn with_node(mut self, node: Option<&str>) -> Self {
        self.node = node.map(str::to_string);
        self
    }
}

#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    /// Start an execution; returns its id once admitted
    async fn run(&self, data: EmittedData) -> Result<String>;
}

#[async_trait]
pub trait ErrorWorkflowRunner: Send + Sync {
    async fn run_error_workflow(&self, run: FailedRun) -> Result<()>;
}

/// An execution that passed admission control
#[derive(Debug, Clone)]
pub struct AdmittedExecution {
    pub execution_id: String,
    pub data: EmittedData,
}

/// [`WorkflowRunner`] that gates executions through admission control and
/// hands admitted ones to an executor channel
pub struct ExecutionDispatcher {
    concurrency: Arc<ConcurrencyControlService>,
    executions: mpsc::UnboundedSender<AdmittedExecution>,
}

impl ExecutionDispatcher {
    pub fn new(
        concurrency: Arc<ConcurrencyControlService>,
    ) -> (Self, mpsc::UnboundedReceiver<AdmittedExecution>) {
        let (executions, receiver) = mpsc::unbounded_channel();
        (Self { concurrency, executions }, receiver)
    }

    /// The executor finished an execution
    pub fn complete(&self, execution_id: &str, mode: ExecutionMode) {
        tracing::debug!("Execution {} finished", execution_id);
        self.concurrency.release(mode);
    }

    /// The execution was cancelled before or while running
    pub fn cancel(&self, execution_id: &str, mode: ExecutionMode) {
        tracing::debug!("Execution {} cancelled", execution_id);
        self.concurrency.remove(execution_id, mode);
    }
}

#[async_trait]
impl WorkflowRunner for ExecutionDispatcher {
    async fn run(&self, data: EmittedData) -> Result<String> {
        let execution_id = Uuid::new_v4().to_string();
        let mode = data.mode;

        self.concurrency.check(&execution_id, mode).await;

        tracing::info!(
            "🚀 Starting execution {} of workflow {} from node '{}'",
            execution_id,
            data.workflow.id,
            data.node
        );
        if self
            .executions
            .send(AdmittedExecution {
                execution_id: execution_id.clone(),
                data,
            })
            .is_err()
        {
            self.concurrency.remove(&execution_id, mode);
            return Err(anyhow::anyhow!("Executor is not running"));
        }

        Ok(execution_id)
    }
}

/// [`ErrorWorkflowRunner`] that queues failed runs for workflows that have an
/// error workflow configured
pub struct ErrorWorkflowDispatcher {
    failed_runs: mpsc::UnboundedSender<FailedRun>,
}

impl ErrorWorkflowDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FailedRun>) {
        let (failed_runs, receiver) = mpsc::unbounded_channel();
        (Self { failed_runs }, receiver)
    }
}

#[async_trait]
impl ErrorWorkflowRunner for ErrorWorkflowDispatcher {
    async fn run_error_workflow(&self, run: FailedRun) -> Result<()> {
        let Some(error_workflow) = run.error_workflow.clone() else {
            tracing::debug!("Workflow {} has no error workflow configured", run.workflow_id);
            return Ok(());
        };

        tracing::info!("📨 Running error workflow {} for workflow {}", error_workflow, run.workflow_id);
        self.failed_runs
            .send(run)
            .map_err(|_| anyhow::anyhow!("Error workflow executor is not running"))
    }
}
