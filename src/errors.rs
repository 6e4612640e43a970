//! Error types for activation, deactivation and admission control.

use thiserror::Error;

/// Severity attached to activation failures
///
/// Warnings are expected conditions (missing workflow, nothing to start) and are
/// kept out of error tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorLevel {
    Warning,
    #[default]
    Error,
}

/// A workflow could not be activated
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ActivationError {
    message: String,
    level: ErrorLevel,
    node: Option<String>,
    #[source]
    cause: Option<anyhow::Error>,
}

impl ActivationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: ErrorLevel::Error,
            node: None,
            cause: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: ErrorLevel::Warning,
            ..Self::new(message)
        }
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_cause(mut self, cause: anyhow::Error) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn level(&self) -> ErrorLevel {
        self.level
    }

    /// Name of the node that failed, if the failure is node-specific
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }
}

/// Storing a webhook hit an existing `(path, method)` registration
#[derive(Debug, Error)]
#[error("The URL path that the \"{node}\" node uses is already taken. Please change it to something else.")]
pub struct WebhookPathTakenError {
    pub node: String,
    #[source]
    pub source: anyhow::Error,
}

/// A trigger close callback failed with a non-recoverable error
///
/// Raised after the registry entry has already been dropped.
#[derive(Debug, Error)]
#[error("Failed to deactivate trigger of workflow ID \"{workflow_id}\": \"{message}\"")]
pub struct DeactivationError {
    pub workflow_id: String,
    pub message: String,
}

/// Recoverable failure while closing a trigger, reported and swallowed
#[derive(Debug, Error)]
#[error("Trigger \"{node}\" could not be closed cleanly: {message}")]
pub struct TriggerCloseError {
    pub node: String,
    pub message: String,
    pub level: ErrorLevel,
}

/// Outcome of a failed trigger close callback
#[derive(Debug, Error)]
pub enum CloseError {
    #[error(transparent)]
    Recoverable(#[from] TriggerCloseError),
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

/// Invalid admission control configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Concurrency cap of 0 is not supported. Use a positive cap to enable concurrency control, or a negative cap to disable it.")]
    UnsupportedConcurrencyCap,
}

/// Everything the activation manager can fail with
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Activation(#[from] ActivationError),
    #[error(transparent)]
    WebhookPathTaken(#[from] WebhookPathTakenError),
    #[error(transparent)]
    Deactivation(#[from] DeactivationError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ManagerError {
    pub fn level(&self) -> ErrorLevel {
        match self {
            ManagerError::Activation(e) => e.level(),
            _ => ErrorLevel::Error,
        }
    }

    /// Authorization failures are not retried: credentials need fixing first
    pub fn is_authorization_failure(&self) -> bool {
        self.to_string().contains("Authorization")
    }
}
