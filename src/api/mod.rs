/// HTTP API Layer
///
/// A narrow management surface over the activation subsystem:
/// - Store workflow definitions and (de)activate them
/// - Inspect registered triggers/pollers, activation errors and the admission queue

// Workflow storage and activation endpoints
pub mod workflows;

// Registry, activation error and admission queue views
pub mod status;

pub use status::create_status_routes;
pub use workflows::{create_workflow_routes, AppState};
