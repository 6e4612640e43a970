/// Retry scheduling for failed activations
///
/// Every queued workflow moves through an explicit state machine:
///
/// ```text
/// Idle --enqueue--> Scheduled --timer--> Retrying --ok--> Idle
///                       ^                    |
///                       +-------err----------+   (delay doubles, capped)
/// ```
///
/// The queue keeps at most one timer per workflow. Enqueueing again or
/// removing the workflow aborts a timer that hasn't fired yet; an attempt that
/// is already running always runs to completion.

use crate::{errors::ManagerError, workflow::types::ActivationMode};
use futures::future::BoxFuture;
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::task::AbortHandle;

/// One activation attempt: `(workflow id, activation mode)`
pub type RetryAttempt =
    Arc<dyn Fn(String, ActivationMode) -> BoxFuture<'static, Result<(), ManagerError>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RetryPhase {
    /// Not queued
    Idle,
    /// Waiting for the timer
    Scheduled,
    /// Attempt in progress
    Retrying,
}

struct QueuedActivation {
    activation_mode: ActivationMode,
    last_timeout: Duration,
    phase: RetryPhase,
    /// Bumped on every enqueue so stale timers and attempts can tell they were superseded
    generation: u64,
    timer: Option<AbortHandle>,
    attempt: RetryAttempt,
}

#[derive(Default)]
struct QueueState {
    queued: HashMap<String, QueuedActivation>,
    next_generation: u64,
}

struct QueueInner {
    initial_timeout: Duration,
    max_timeout: Duration,
    state: Mutex<QueueState>,
}

/// Per-workflow retry queue with capped exponential backoff
#[derive(Clone)]
pub struct ActivationQueue {
    inner: Arc<QueueInner>,
}

impl ActivationQueue {
    pub fn new(initial_timeout: Duration, max_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                initial_timeout,
                max_timeout: max_timeout.max(initial_timeout),
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// Schedule retries for a workflow, replacing any earlier schedule
    pub fn enqueue(&self, workflow_id: &str, activation_mode: ActivationMode, attempt: RetryAttempt) {
        let mut state = self.inner.state();
        if let Some(previous) = state.queued.remove(workflow_id) {
            if let Some(timer) = previous.timer {
                timer.abort();
            }
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        let delay = self.inner.initial_timeout;
        let timer = QueueInner::start_timer(&self.inner, workflow_id.to_string(), generation, delay);

        state.queued.insert(
            workflow_id.to_string(),
            QueuedActivation {
                activation_mode,
                last_timeout: delay,
                phase: RetryPhase::Scheduled,
                generation,
                timer: Some(timer),
                attempt,
            },
        );
        tracing::debug!("Queued re-activation of workflow {} in {:?}", workflow_id, delay);
    }

    /// Drop a workflow from the queue; false if it wasn't queued
    pub fn remove(&self, workflow_id: &str) -> bool {
        let Some(queued) = self.inner.state().queued.remove(workflow_id) else {
            return false;
        };
        if let Some(timer) = queued.timer {
            timer.abort();
        }
        true
    }

    pub fn remove_all(&self) {
        let drained: Vec<QueuedActivation> = self.inner.state().queued.drain().map(|(_, queued)| queued).collect();
        for queued in drained {
            if let Some(timer) = queued.timer {
                timer.abort();
            }
        }
    }

    pub fn contains(&self, workflow_id: &str) -> bool {
        self.inner.state().queued.contains_key(workflow_id)
    }

    pub fn len(&self) -> usize {
        self.inner.state().queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn phase(&self, workflow_id: &str) -> RetryPhase {
        self.inner
            .state()
            .queued
            .get(workflow_id)
            .map_or(RetryPhase::Idle, |queued| queued.phase)
    }

    /// Delay that was used for the latest scheduled attempt
    pub fn last_timeout(&self, workflow_id: &str) -> Option<Duration> {
        self.inner.state().queued.get(workflow_id).map(|queued| queued.last_timeout)
    }

    /// Number of live (not yet fired) timers
    pub fn pending_timers(&self) -> usize {
        self.inner
            .state()
            .queued
            .values()
            .filter(|queued| queued.timer.as_ref().is_some_and(|timer| !timer.is_finished()))
            .count()
    }

    pub fn queued_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.state().queued.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl QueueInner {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_timer(inner: &Arc<Self>, workflow_id: String, generation: u64, delay: Duration) -> AbortHandle {
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            Self::fire(inner, workflow_id, generation).await;
        })
        .abort_handle()
    }

    async fn fire(inner: Arc<Self>, workflow_id: String, generation: u64) {
        let (activation_mode, attempt) = {
            let mut state = inner.state();
            let Some(queued) = state.queued.get_mut(&workflow_id) else {
                return;
            };
            if queued.generation != generation {
                return;
            }
            queued.phase = RetryPhase::Retrying;
            // From here on the attempt can't be aborted
            queued.timer = None;
            (queued.activation_mode, Arc::clone(&queued.attempt))
        };

        tracing::info!("Try to activate workflow {}", workflow_id);
        let result = attempt(workflow_id.clone(), activation_mode).await;

        let mut state = inner.state();
        let current = state
            .queued
            .get(&workflow_id)
            .is_some_and(|queued| queued.generation == generation);

        match result {
            Ok(()) => {
                if current {
                    state.queued.remove(&workflow_id);
                }
                tracing::info!(" -> Activation of workflow {} was successful!", workflow_id);
            }
            Err(e) => {
                let Some(queued) = state.queued.get_mut(&workflow_id).filter(|_| current) else {
                    tracing::debug!("Retry of workflow {} failed after it left the queue: {}", workflow_id, e);
                    return;
                };
                let next = queued.last_timeout.saturating_mul(2).min(inner.max_timeout);
                tracing::info!(
                    " -> Activation of workflow {} did fail with error: \"{}\" | retry in {} seconds",
                    workflow_id,
                    e,
                    next.as_secs()
                );
                queued.last_timeout = next;
                queued.phase = RetryPhase::Scheduled;
                queued.timer = Some(Self::start_timer(&inner, workflow_id.clone(), generation, next));
            }
        }
    }
}
