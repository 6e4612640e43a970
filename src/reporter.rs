//! Error tracking sink.

use crate::errors::ErrorLevel;

/// Where failures worth a human's attention go
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &(dyn std::error::Error + 'static), level: ErrorLevel, workflow_id: Option<&str>);
}

/// Reporter that writes to the log; warnings are dropped
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, error: &(dyn std::error::Error + 'static), level: ErrorLevel, workflow_id: Option<&str>) {
        if level == ErrorLevel::Warning {
            return;
        }
        match workflow_id {
            Some(workflow_id) => tracing::error!(workflow_id, "🔥 {}", error),
            None => tracing::error!("🔥 {}", error),
        }
    }
}
