/// Workflow activation
///
/// Keeps the workflows that are marked active actually listening: webhooks in
/// the shared table, triggers and pollers in this instance's registry, failed
/// activations in a retry queue.

// Activation orchestrator
pub mod manager;

// Retry scheduling with capped exponential backoff
pub mod queue;

// Last activation error per workflow
pub mod errors;

// Instance role and multi-main commands
pub mod instance;

pub use errors::ActivationErrorsService;
pub use instance::{InstanceRole, InstanceSettings, LocalPublisher, PubSubCommand, Publisher};
pub use manager::{ActiveWorkflowManager, ManagerDependencies, ManagerOptions};
pub use queue::{ActivationQueue, RetryPhase};
