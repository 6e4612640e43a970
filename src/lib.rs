/// flowgate: active workflow activation and execution admission control
///
/// Keeps workflows that are marked active actually listening (webhooks,
/// triggers, pollers), retries failed activations with backoff and caps how
/// many production executions run at once.

// Core configuration and setup
pub mod config;

// Domain error types
pub mod errors;

// Error tracking sink
pub mod reporter;

// SQLite connection setup
pub mod database;

// Workflow records, graph view, node type registry and storage
pub mod workflow;

// Node capabilities and built-in node types
pub mod nodes;

// Webhook path rules and the webhook table
pub mod webhooks;

// Trigger/poll registry, contexts, cron scheduling and execution hand-off
pub mod runtime;

// Activation orchestrator, retry queue and instance role
pub mod activation;

// Production execution admission control
pub mod concurrency;

// HTTP API layer
pub mod api;

// Server setup and initialization
pub mod server;

pub use activation::ActiveWorkflowManager;
pub use concurrency::ConcurrencyControlService;
pub use errors::{ActivationError, ManagerError};
pub use server::start_server;
