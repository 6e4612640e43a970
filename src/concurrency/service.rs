/// Admission control for production executions
///
/// Webhook and trigger executions share one queue; every other mode bypasses
/// it. A negative cap turns the whole service into a pass-through.

use crate::{
    concurrency::queue::ConcurrencyQueue,
    errors::ConfigurationError,
    workflow::types::ExecutionMode,
};
use serde::Serialize;

/// Queue contents, for the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConcurrencySnapshot {
    pub enabled: bool,
    pub capacity: Option<usize>,
    pub running: Vec<String>,
    pub waiting: Vec<String>,
}

pub struct ConcurrencyControlService {
    production: Option<ConcurrencyQueue>,
}

impl ConcurrencyControlService {
    /// Build from the configured production cap
    ///
    /// `0` is rejected, negative values disable admission control.
    pub fn new(production_cap: i64) -> Result<Self, ConfigurationError> {
        if production_cap == 0 {
            return Err(ConfigurationError::UnsupportedConcurrencyCap);
        }

        let production = usize::try_from(production_cap).ok().map(ConcurrencyQueue::new);
        match &production {
            Some(queue) => tracing::info!("🚦 Production concurrency limited to {}", queue.capacity()),
            None => tracing::debug!("Production concurrency is unlimited"),
        }

        Ok(Self { production })
    }

    pub fn is_enabled(&self) -> bool {
        self.production.is_some()
    }

    pub fn production_queue(&self) -> Option<&ConcurrencyQueue> {
        self.production.as_ref()
    }

    fn queue_for(&self, mode: ExecutionMode) -> Option<&ConcurrencyQueue> {
        if mode.is_internal() {
            return None;
        }
        self.production.as_ref()
    }

    /// Block until the execution may start
    pub async fn check(&self, execution_id: &str, mode: ExecutionMode) {
        if let Some(queue) = self.queue_for(mode) {
            queue.enqueue(execution_id).await;
        }
    }

    /// A gated execution finished
    pub fn release(&self, mode: ExecutionMode) {
        if let Some(queue) = self.queue_for(mode) {
            queue.dequeue();
        }
    }

    /// Drop an execution that will not run (or not finish) normally
    pub fn remove(&self, execution_id: &str, mode: ExecutionMode) {
        if let Some(queue) = self.queue_for(mode) {
            queue.remove(execution_id);
        }
    }

    pub fn remove_many(&self, execution_ids: &[String]) {
        let Some(queue) = &self.production else {
            return;
        };
        for execution_id in execution_ids {
            queue.remove(execution_id);
        }
    }

    /// Empty the queue, running executions first; no waiter gets admitted
    pub fn remove_all(&self) {
        let Some(queue) = &self.production else {
            return;
        };
        for execution_id in queue.get_all() {
            queue.discard(&execution_id);
        }
    }

    pub fn snapshot(&self) -> ConcurrencySnapshot {
        match &self.production {
            Some(queue) => ConcurrencySnapshot {
                enabled: true,
                capacity: Some(queue.capacity()),
                running: queue.running(),
                waiting: queue.waiting(),
            },
            None => ConcurrencySnapshot {
                enabled: false,
                capacity: None,
                running: Vec::new(),
                waiting: Vec::new(),
            },
        }
    }
}
