/// Read-mostly views of the activation state
///
/// GET    /api/active-workflows
/// GET    /api/active-workflows/errors
/// DELETE /api/active-workflows/errors
/// GET    /api/concurrency

use crate::{api::workflows::AppState, concurrency::ConcurrencySnapshot, runtime::active_workflows::ActiveWorkflowInfo};
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveWorkflowsResponse {
    /// Workflows with triggers or pollers registered on this instance
    pub workflow_ids: Vec<String>,
    pub workflows: Vec<ActiveWorkflowInfo>,
    /// Workflows waiting for another activation attempt
    pub queued_retries: Vec<String>,
}

pub fn create_status_routes() -> Router<AppState> {
    Router::new()
        .route("/api/active-workflows", get(list_active_workflows))
        .route(
            "/api/active-workflows/errors",
            get(list_activation_errors).delete(clear_activation_errors),
        )
        .route("/api/concurrency", get(concurrency_snapshot))
}

async fn list_active_workflows(State(state): State<AppState>) -> Json<ActiveWorkflowsResponse> {
    let workflow_ids = state.manager.all_active_in_memory();
    let workflows = workflow_ids
        .iter()
        .filter_map(|id| state.manager.active_workflows().get(id))
        .collect();

    Json(ActiveWorkflowsResponse {
        workflow_ids,
        workflows,
        queued_retries: state.manager.activation_queue().queued_ids(),
    })
}

async fn list_activation_errors(State(state): State<AppState>) -> Json<HashMap<String, String>> {
    Json(state.manager.get_all_workflow_activation_errors())
}

async fn clear_activation_errors(State(state): State<AppState>) -> StatusCode {
    state.manager.clear_all_activation_errors();
    StatusCode::NO_CONTENT
}

async fn concurrency_snapshot(State(state): State<AppState>) -> Json<ConcurrencySnapshot> {
    Json(state.concurrency.snapshot())
}
