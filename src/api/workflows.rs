/// Workflow activation REST API endpoints
///
/// Stores workflow definitions and flips their activation state. Activating
/// writes the `active` flag first; a failed activation leaves it set so the
/// retry queue (or a later manual activation) can pick the workflow up.

use crate::{
    activation::ActiveWorkflowManager,
    concurrency::ConcurrencyControlService,
    workflow::{
        storage::{SqliteWorkflowStorage, WorkflowRepository},
        types::{ActivationMode, WorkflowRecord},
    },
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use serde::Serialize;
use std::sync::Arc;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Workflow storage for persistence
    pub storage: SqliteWorkflowStorage,
    /// Activation orchestrator
    pub manager: Arc<ActiveWorkflowManager>,
    /// Production admission control
    pub concurrency: Arc<ConcurrencyControlService>,
}

/// Response for workflow operations
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub active: bool,
    pub message: String,
}

/// Create workflow routes
pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(save_workflow))
        .route("/api/workflows/{id}/activate", post(activate_workflow))
        .route("/api/workflows/{id}/deactivate", post(deactivate_workflow))
}

/// Store a workflow definition
///
/// POST /api/workflows
/// The stored `active` flag is not changed; use the activate endpoint.
async fn save_workflow(
    State(state): State<AppState>,
    Json(mut workflow): Json<WorkflowRecord>,
) -> Result<Json<WorkflowResponse>, StatusCode> {
    if workflow.id.is_empty() || workflow.name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let existing = state.storage.find_by_id(&workflow.id).await.map_err(|e| {
        tracing::error!("❌ Failed to load workflow {}: {}", workflow.id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    workflow.active = existing.is_some_and(|w| w.active);

    state.storage.save_workflow(&workflow).await.map_err(|e| {
        tracing::error!("❌ Failed to save workflow {}: {}", workflow.id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    tracing::info!("✅ Saved workflow {}", workflow.display());
    Ok(Json(WorkflowResponse {
        id: workflow.id,
        active: workflow.active,
        message: "Workflow saved".to_string(),
    }))
}

/// Activate a workflow
///
/// POST /api/workflows/{id}/activate
async fn activate_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowResponse>, StatusCode> {
    let found = state.storage.set_active(&id, true).await.map_err(|e| {
        tracing::error!("❌ Failed to update workflow {}: {}", id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    if !found {
        return Err(StatusCode::NOT_FOUND);
    }

    if let Err(e) = state.manager.add(&id, ActivationMode::Activate, None, true).await {
        tracing::warn!("⚠️ Workflow {} could not be activated: {}", id, e);
        return Err(StatusCode::BAD_REQUEST);
    }

    Ok(Json(WorkflowResponse {
        id,
        active: true,
        message: "Workflow activated".to_string(),
    }))
}

/// Deactivate a workflow
///
/// POST /api/workflows/{id}/deactivate
async fn deactivate_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowResponse>, StatusCode> {
    let found = state.storage.set_active(&id, false).await.map_err(|e| {
        tracing::error!("❌ Failed to update workflow {}: {}", id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    if !found {
        return Err(StatusCode::NOT_FOUND);
    }

    state.manager.remove(&id).await.map_err(|e| {
        tracing::error!("❌ Failed to deactivate workflow {}: {}", id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(WorkflowResponse {
        id,
        active: false,
        message: "Workflow deactivated".to_string(),
    }))
}
