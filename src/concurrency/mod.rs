/// Execution admission control
///
/// Caps how many production (webhook and trigger) executions run at once.
/// Executions over the cap wait in strict arrival order.

// FIFO queue of running and waiting executions
pub mod queue;

// Mode-aware front of the production queue
pub mod service;

pub use queue::ConcurrencyQueue;
pub use service::{ConcurrencyControlService, ConcurrencySnapshot};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::ConfigurationError, workflow::types::ExecutionMode};

    #[test]
    fn zero_cap_is_rejected() {
        assert_eq!(
            ConcurrencyControlService::new(0).err(),
            Some(ConfigurationError::UnsupportedConcurrencyCap)
        );
    }

    #[test]
    fn negative_cap_disables_the_service() {
        let service = ConcurrencyControlService::new(-1).unwrap();
        assert!(!service.is_enabled());
        assert!(service.production_queue().is_none());
        assert!(!service.snapshot().enabled);
    }

    #[tokio::test]
    async fn internal_modes_bypass_the_queue() {
        let service = ConcurrencyControlService::new(1).unwrap();
        for mode in [
            ExecutionMode::Cli,
            ExecutionMode::Error,
            ExecutionMode::Integrated,
            ExecutionMode::Internal,
            ExecutionMode::Manual,
            ExecutionMode::Retry,
        ] {
            service.check("internal", mode).await;
            service.release(mode);
            service.remove("internal", mode);
        }
        assert!(service.snapshot().running.is_empty());

        service.check("prod", ExecutionMode::Webhook).await;
        service.release(ExecutionMode::Manual);
        assert_eq!(service.snapshot().running, vec!["prod"]);
    }
}
