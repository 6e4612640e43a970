/// Server setup and initialization
///
/// Wires together all components: storage, node types, cron scheduler,
/// admission control, the activation manager and HTTP routes.

use crate::{
    activation::{
        ActiveWorkflowManager, InstanceRole, LocalPublisher, ManagerDependencies, ManagerOptions,
    },
    api::{create_status_routes, create_workflow_routes, AppState},
    concurrency::ConcurrencyControlService,
    config::Config,
    database,
    nodes::builtin::register_builtin_nodes,
    reporter::TracingErrorReporter,
    runtime::{
        runner::{AdmittedExecution, ErrorWorkflowDispatcher, ExecutionDispatcher, FailedRun},
        scheduler::CronTaskManager,
    },
    webhooks::SqliteWebhookStore,
    workflow::{node_types::NodeTypes, storage::SqliteWorkflowStorage},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::{net::TcpListener, sync::mpsc};

/// A fully wired application
pub struct Application {
    pub router: Router,
    pub manager: Arc<ActiveWorkflowManager>,
    scheduler: Arc<CronTaskManager>,
}

impl Application {
    /// Drop every trigger and poller registration and stop the scheduler
    pub async fn shutdown(&self) -> Result<()> {
        self.manager.shutdown().await;
        self.scheduler.stop().await
    }
}

/// Create the application and activate every stored active workflow
pub async fn create_app(config: Config) -> Result<Application> {
    tracing::info!("🗄️ Connecting to database in {}", config.database.data_dir);
    let pool = database::connect(&config.database).await?;
    let storage = SqliteWorkflowStorage::new(pool.clone());
    let webhook_store = SqliteWebhookStore::new(pool);

    tracing::info!("📝 Registering built-in node types");
    let node_types = Arc::new(NodeTypes::new());
    register_builtin_nodes(&node_types);

    tracing::info!("⏰ Initializing cron task manager");
    let scheduler = Arc::new(
        CronTaskManager::new()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize cron task manager: {}", e))?,
    );
    scheduler.start().await?;

    let concurrency = Arc::new(ConcurrencyControlService::new(config.concurrency.production_cap)?);
    let (dispatcher, executions) = ExecutionDispatcher::new(Arc::clone(&concurrency));
    let dispatcher = Arc::new(dispatcher);
    tokio::spawn(run_executor(Arc::clone(&dispatcher), executions));

    let (error_workflows, failed_runs) = ErrorWorkflowDispatcher::new();
    tokio::spawn(log_failed_runs(failed_runs));

    let instance = Arc::new(InstanceRole::from_config(&config.instance));
    let publisher = Arc::new(LocalPublisher::new(64));
    let mut commands = publisher.subscribe();

    tracing::info!("🚀 Initializing activation manager");
    let manager = ActiveWorkflowManager::new(
        ManagerDependencies {
            workflows: Arc::new(storage.clone()),
            webhooks: Arc::new(webhook_store),
            node_types,
            instance,
            publisher,
            scheduler: Arc::clone(&scheduler) as _,
            runner: Arc::clone(&dispatcher) as _,
            error_workflows: Arc::new(error_workflows),
            reporter: Arc::new(TracingErrorReporter),
        },
        ManagerOptions::from_config(&config),
    );
    manager.start();

    let listener = Arc::clone(&manager);
    tokio::spawn(async move {
        while let Ok(command) = commands.recv().await {
            if let Err(e) = listener.handle_command(command).await {
                tracing::error!("❌ Failed to handle command: {}", e);
            }
        }
    });

    manager.init().await?;

    let app_state = AppState {
        storage,
        manager: Arc::clone(&manager),
        concurrency,
    };

    tracing::info!("📡 Creating HTTP router");
    let router = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_workflow_routes().with_state(app_state.clone()))
        .merge(create_status_routes().with_state(app_state));

    tracing::info!("✅ Application initialized successfully");
    Ok(Application {
        router,
        manager,
        scheduler,
    })
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting flowgate server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.router.clone().into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("🛑 Shutting down");
    app.shutdown().await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
    }
}

/// Stand-in executor: admitted executions finish immediately
async fn run_executor(dispatcher: Arc<ExecutionDispatcher>, mut executions: mpsc::UnboundedReceiver<AdmittedExecution>) {
    while let Some(execution) = executions.recv().await {
        tracing::info!(
            "📥 Execution {} of workflow {} received {} item(s)",
            execution.execution_id,
            execution.data.workflow.id,
            execution.data.data.len()
        );
        dispatcher.complete(&execution.execution_id, execution.data.mode);
    }
}

async fn log_failed_runs(mut failed_runs: mpsc::UnboundedReceiver<FailedRun>) {
    while let Some(run) = failed_runs.recv().await {
        tracing::warn!(
            "⚠️ Error workflow {:?} triggered by workflow {} ({}): {}",
            run.error_workflow,
            run.workflow_id,
            run.mode,
            run.message
        );
    }
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
