#![allow(dead_code)]

use async_trait::async_trait;
use flowgate::{
    activation::{ActiveWorkflowManager, InstanceRole, ManagerDependencies, ManagerOptions, PubSubCommand, Publisher},
    errors::{CloseError, ErrorLevel, TriggerCloseError},
    nodes::{builtin, NodeKind, NodeTypeDescriptor, PollNode, TriggerNode, TriggerResponse, WebhookNode},
    reporter::ErrorReporter,
    runtime::{
        context::{EmittedData, PollContext, TriggerContext},
        runner::{ErrorWorkflowRunner, FailedRun, WorkflowRunner},
        scheduler::{ScheduledTask, ScheduledTaskManager},
    },
    webhooks::{WebhookData, WebhookDescription, WebhookEntity, WebhookStore, WebhookStoreError},
    workflow::{
        storage::WorkflowRepository,
        types::{Connection, Node, WorkflowRecord, WorkflowSettings},
        NodeTypes,
    },
};
use serde_json::{json, Value};
use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::sync::Notify;
use uuid::Uuid;

pub const TRIGGER: &str = "test.trigger";
pub const POLLER: &str = "test.poller";
pub const HOOK: &str = "test.webhook";
pub const GATED: &str = "test.gated";

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingScheduler {
    pub registered: Mutex<Vec<(String, String, Uuid)>>,
    pub deregistered: Mutex<Vec<Uuid>>,
    tasks: Mutex<HashMap<Uuid, ScheduledTask>>,
    /// Fail the n-th registration (0-based)
    pub fail_registration: Mutex<Option<usize>>,
}

impl RecordingScheduler {
    pub fn registered_expressions(&self) -> Vec<String> {
        self.registered.lock().unwrap().iter().map(|(_, expr, _)| expr.clone()).collect()
    }

    pub fn live_tasks(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Run every live task once
    pub async fn tick(&self) {
        let tasks: Vec<ScheduledTask> = self.tasks.lock().unwrap().values().cloned().collect();
        for task in tasks {
            task().await;
        }
    }
}

#[async_trait]
impl ScheduledTaskManager for RecordingScheduler {
    async fn register_cron(&self, workflow_id: &str, expression: &str, task: ScheduledTask) -> anyhow::Result<Uuid> {
        let mut registered = self.registered.lock().unwrap();
        if *self.fail_registration.lock().unwrap() == Some(registered.len()) {
            anyhow::bail!("scheduler unavailable");
        }
        let handle = Uuid::new_v4();
        registered.push((workflow_id.to_string(), expression.to_string(), handle));
        self.tasks.lock().unwrap().insert(handle, task);
        Ok(handle)
    }

    async fn deregister(&self, handle: &Uuid) -> anyhow::Result<()> {
        self.deregistered.lock().unwrap().push(*handle);
        self.tasks.lock().unwrap().remove(handle);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Node types
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseBehavior {
    Ok,
    Recoverable,
    Fatal,
}

/// Trigger whose activation outcome is driven by node parameters:
/// `{"fail": "<message>"}` fails every activation,
/// `{"failTimes": n, "fail": "<message>"}` fails the first n.
pub struct TestTrigger {
    pub activations: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
    pub close_behavior: Mutex<CloseBehavior>,
    pub contexts: Mutex<Vec<TriggerContext>>,
}

impl Default for TestTrigger {
    fn default() -> Self {
        Self {
            activations: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
            close_behavior: Mutex::new(CloseBehavior::Ok),
            contexts: Mutex::new(Vec::new()),
        }
    }
}

impl TestTrigger {
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn context(&self, node: &str) -> Option<TriggerContext> {
        self.contexts
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|ctx| ctx.node().name == node)
            .cloned()
    }
}

#[async_trait]
impl TriggerNode for TestTrigger {
    async fn trigger(&self, ctx: TriggerContext) -> anyhow::Result<TriggerResponse> {
        let attempt = self.activations.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = ctx.parameter("fail").and_then(Value::as_str) {
            let fail_times = ctx.parameter("failTimes").and_then(Value::as_u64).unwrap_or(u64::MAX);
            if (attempt as u64) < fail_times {
                anyhow::bail!("{}", message);
            }
        }

        self.contexts.lock().unwrap().push(ctx.clone());
        let closes = Arc::clone(&self.closes);
        let behavior = *self.close_behavior.lock().unwrap();
        let node = ctx.node().name.clone();
        Ok(TriggerResponse::with_close(move || async move {
            closes.fetch_add(1, Ordering::SeqCst);
            match behavior {
                CloseBehavior::Ok => Ok(()),
                CloseBehavior::Recoverable => Err(CloseError::Recoverable(TriggerCloseError {
                    node,
                    message: "connection already gone".into(),
                    level: ErrorLevel::Warning,
                })),
                CloseBehavior::Fatal => Err(CloseError::Fatal(anyhow::anyhow!("Close function failed"))),
            }
        }))
    }
}

/// Trigger that holds its activation until the test opens its gate
///
/// The gate is the node's `gate` parameter. `events` records `start:<gate>`
/// and `end:<gate>` in the order activations begin and finish.
#[derive(Default)]
pub struct GatedTrigger {
    pub events: Mutex<Vec<String>>,
    opened: Mutex<HashSet<String>>,
    changed: Notify,
}

impl GatedTrigger {
    pub fn open(&self, gate: &str) {
        self.opened.lock().unwrap().insert(gate.to_string());
        self.changed.notify_waiters();
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn started(&self, gate: &str) -> bool {
        self.events().contains(&format!("start:{gate}"))
    }
}

#[async_trait]
impl TriggerNode for GatedTrigger {
    async fn trigger(&self, ctx: TriggerContext) -> anyhow::Result<TriggerResponse> {
        let gate = ctx.parameter("gate").and_then(Value::as_str).unwrap_or_default().to_string();
        self.events.lock().unwrap().push(format!("start:{gate}"));
        loop {
            // Registered before the check so an `open` in between isn't lost
            let changed = self.changed.notified();
            let open = self.opened.lock().unwrap().contains(&gate);
            if open {
                break;
            }
            changed.await;
        }
        self.events.lock().unwrap().push(format!("end:{gate}"));
        Ok(TriggerResponse::without_close())
    }
}

/// Poller returning `{"item": n}` per poll, or failing when `{"fail": ...}` is set
#[derive(Default)]
pub struct TestPoller {
    pub polls: AtomicUsize,
    pub failing: AtomicBool,
}

#[async_trait]
impl PollNode for TestPoller {
    async fn poll(&self, ctx: &PollContext) -> anyhow::Result<Option<Vec<Value>>> {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("upstream unavailable");
        }
        if let Some(message) = ctx.parameter("fail").and_then(Value::as_str) {
            anyhow::bail!("{}", message);
        }
        Ok(Some(vec![json!({ "item": poll })]))
    }
}

/// Webhook node recording its external hooks
#[derive(Default)]
pub struct TestWebhook {
    pub created: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl WebhookNode for TestWebhook {
    fn webhooks(&self, node: &Node) -> Vec<WebhookDescription> {
        let path = node.parameter("path").and_then(Value::as_str).unwrap_or_default();
        let description = WebhookDescription::new("POST", path);
        if node.parameter("isFullPath").and_then(Value::as_bool).unwrap_or(false) {
            vec![description.full_path()]
        } else {
            vec![description]
        }
    }

    async fn check_exists(&self, _webhook: &WebhookData) -> anyhow::Result<bool> {
        Ok(false)
    }

    async fn create(&self, webhook: &WebhookData) -> anyhow::Result<()> {
        self.created.lock().unwrap().push(webhook.path.clone());
        Ok(())
    }

    async fn delete(&self, webhook: &WebhookData) -> anyhow::Result<()> {
        self.deleted.lock().unwrap().push(webhook.path.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryWorkflows {
    pub workflows: Mutex<HashMap<String, WorkflowRecord>>,
    pub trigger_counts: Mutex<HashMap<String, usize>>,
}

impl InMemoryWorkflows {
    pub fn insert(&self, workflow: WorkflowRecord) {
        self.workflows.lock().unwrap().insert(workflow.id.clone(), workflow);
    }

    pub fn trigger_count(&self, workflow_id: &str) -> Option<usize> {
        self.trigger_counts.lock().unwrap().get(workflow_id).copied()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflows {
    async fn get_all_active(&self) -> anyhow::Result<Vec<WorkflowRecord>> {
        let mut active: Vec<WorkflowRecord> = self
            .workflows
            .lock()
            .unwrap()
            .values()
            .filter(|w| w.active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(active)
    }

    async fn find_by_id(&self, workflow_id: &str) -> anyhow::Result<Option<WorkflowRecord>> {
        Ok(self.workflows.lock().unwrap().get(workflow_id).cloned())
    }

    async fn update_trigger_count(&self, workflow_id: &str, count: usize) -> anyhow::Result<()> {
        self.trigger_counts.lock().unwrap().insert(workflow_id.to_string(), count);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryWebhooks {
    pub rows: Mutex<Vec<WebhookEntity>>,
}

impl InMemoryWebhooks {
    pub fn paths_of(&self, workflow_id: &str) -> Vec<String> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.workflow_id == workflow_id)
            .map(|row| row.webhook_path.clone())
            .collect()
    }
}

#[async_trait]
impl WebhookStore for InMemoryWebhooks {
    async fn store_webhook(&self, webhook: &WebhookEntity) -> Result<(), WebhookStoreError> {
        let mut rows = self.rows.lock().unwrap();
        if rows
            .iter()
            .any(|row| row.webhook_path == webhook.webhook_path && row.method == webhook.method)
        {
            return Err(WebhookStoreError::UniqueViolation {
                method: webhook.method.clone(),
                path: webhook.webhook_path.clone(),
            });
        }
        rows.push(webhook.clone());
        Ok(())
    }

    async fn delete_workflow_webhooks(&self, workflow_id: &str) -> Result<(), WebhookStoreError> {
        self.rows.lock().unwrap().retain(|row| row.workflow_id != workflow_id);
        Ok(())
    }

    async fn find_workflow_webhooks(&self, workflow_id: &str) -> Result<Vec<WebhookEntity>, WebhookStoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.workflow_id == workflow_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Outbound collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingPublisher {
    pub commands: Mutex<Vec<PubSubCommand>>,
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish_command(&self, command: PubSubCommand) -> anyhow::Result<()> {
        self.commands.lock().unwrap().push(command);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    pub reports: Mutex<Vec<(String, ErrorLevel, Option<String>)>>,
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, error: &(dyn std::error::Error + 'static), level: ErrorLevel, workflow_id: Option<&str>) {
        self.reports
            .lock()
            .unwrap()
            .push((error.to_string(), level, workflow_id.map(str::to_string)));
    }
}

#[derive(Default)]
pub struct RecordingRunner {
    pub runs: Mutex<Vec<EmittedData>>,
    pub failed_runs: Mutex<Vec<FailedRun>>,
}

#[async_trait]
impl WorkflowRunner for RecordingRunner {
    async fn run(&self, data: EmittedData) -> anyhow::Result<String> {
        let mut runs = self.runs.lock().unwrap();
        runs.push(data);
        Ok(format!("exec-{}", runs.len()))
    }
}

#[async_trait]
impl ErrorWorkflowRunner for RecordingRunner {
    async fn run_error_workflow(&self, run: FailedRun) -> anyhow::Result<()> {
        self.failed_runs.lock().unwrap().push(run);
        Ok(())
    }
}

pub struct NoopReporter;

impl ErrorReporter for NoopReporter {
    fn report(&self, _error: &(dyn std::error::Error + 'static), _level: ErrorLevel, _workflow_id: Option<&str>) {}
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn trigger_node(name: &str) -> Node {
    Node::new(name, TRIGGER)
}

pub fn failing_trigger_node(name: &str, message: &str) -> Node {
    Node::new(name, TRIGGER).with_parameters(json!({ "fail": message }))
}

pub fn poller_node(name: &str, poll_times: Value) -> Node {
    Node::new(name, POLLER).with_parameters(json!({ "pollTimes": { "item": poll_times } }))
}

pub fn gated_trigger_node(name: &str, gate: &str) -> Node {
    Node::new(name, GATED).with_parameters(json!({ "gate": gate }))
}

pub fn webhook_node(name: &str, path: &str) -> Node {
    Node::new(name, HOOK).with_parameters(json!({ "path": path }))
}

pub fn full_path_webhook_node(name: &str, path: &str) -> Node {
    Node::new(name, HOOK).with_parameters(json!({ "path": path, "isFullPath": true }))
}

pub fn workflow(id: &str, active: bool, nodes: Vec<Node>) -> WorkflowRecord {
    WorkflowRecord {
        id: id.to_string(),
        name: format!("Workflow {id}"),
        active,
        nodes,
        connections: Vec::<Connection>::new(),
        settings: WorkflowSettings {
            error_workflow: Some("wf-errors".to_string()),
        },
    }
}

pub struct TestNodes {
    pub node_types: Arc<NodeTypes>,
    pub trigger: Arc<TestTrigger>,
    pub poller: Arc<TestPoller>,
    pub webhook: Arc<TestWebhook>,
    pub gated: Arc<GatedTrigger>,
}

pub fn test_nodes() -> TestNodes {
    let node_types = Arc::new(NodeTypes::new());
    builtin::register_builtin_nodes(&node_types);

    let trigger = Arc::new(TestTrigger::default());
    let poller = Arc::new(TestPoller::default());
    let webhook = Arc::new(TestWebhook::default());
    let gated = Arc::new(GatedTrigger::default());
    node_types.register(NodeTypeDescriptor::new(TRIGGER, 1, NodeKind::Trigger(trigger.clone())));
    node_types.register(NodeTypeDescriptor::new(POLLER, 1, NodeKind::Poll(poller.clone())));
    node_types.register(NodeTypeDescriptor::new(HOOK, 1, NodeKind::Webhook(webhook.clone())));
    node_types.register(NodeTypeDescriptor::new(GATED, 1, NodeKind::Trigger(gated.clone())));

    TestNodes {
        node_types,
        trigger,
        poller,
        webhook,
        gated,
    }
}

/// A manager wired to in-memory fakes
pub struct Harness {
    pub manager: Arc<ActiveWorkflowManager>,
    pub role: Arc<InstanceRole>,
    pub workflows: Arc<InMemoryWorkflows>,
    pub webhooks: Arc<InMemoryWebhooks>,
    pub scheduler: Arc<RecordingScheduler>,
    pub publisher: Arc<RecordingPublisher>,
    pub reporter: Arc<RecordingReporter>,
    pub runner: Arc<RecordingRunner>,
    pub nodes: TestNodes,
}

impl Harness {
    pub fn single() -> Self {
        Self::new(InstanceRole::new(false, true))
    }

    pub fn new(role: InstanceRole) -> Self {
        let role = Arc::new(role);
        let workflows = Arc::new(InMemoryWorkflows::default());
        let webhooks = Arc::new(InMemoryWebhooks::default());
        let scheduler = Arc::new(RecordingScheduler::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let reporter = Arc::new(RecordingReporter::default());
        let runner = Arc::new(RecordingRunner::default());
        let nodes = test_nodes();

        let manager = ActiveWorkflowManager::new(
            ManagerDependencies {
                workflows: workflows.clone(),
                webhooks: webhooks.clone(),
                node_types: Arc::clone(&nodes.node_types),
                instance: role.clone(),
                publisher: publisher.clone(),
                scheduler: scheduler.clone(),
                runner: runner.clone(),
                error_workflows: runner.clone(),
                reporter: reporter.clone(),
            },
            ManagerOptions {
                activation_batch_size: 2,
                reactivate_initial_timeout: Duration::from_secs(1),
                reactivate_max_timeout: Duration::from_secs(8),
            },
        );

        Self {
            manager,
            role,
            workflows,
            webhooks,
            scheduler,
            publisher,
            reporter,
            runner,
            nodes,
        }
    }

    pub fn failed_runs(&self) -> Vec<FailedRun> {
        self.runner.failed_runs.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<PubSubCommand> {
        self.publisher.commands.lock().unwrap().clone()
    }
}

/// Poll `condition` until it holds, sleeping between checks
pub async fn wait_until<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Run `future` with a generous timeout so a stuck test fails instead of hanging
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}
