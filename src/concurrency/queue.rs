/// Capacity-bounded FIFO admission queue
///
/// `running` holds the ids currently allowed to run, oldest first; `waiting`
/// holds one oneshot sender per blocked `enqueue` call. Releasing a slot hands
/// it to the head of `waiting`.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tokio::sync::oneshot;

struct Waiter {
    execution_id: String,
    release: oneshot::Sender<()>,
}

#[derive(Default)]
struct QueueState {
    running: VecDeque<String>,
    waiting: VecDeque<Waiter>,
}

pub struct ConcurrencyQueue {
    capacity: usize,
    state: Mutex<QueueState>,
}

impl ConcurrencyQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(QueueState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait for a slot
    ///
    /// Resolves immediately while there is room, otherwise once every earlier
    /// waiter was admitted and a slot was released. A waiter dropped through
    /// [`remove`](Self::remove) never resolves.
    pub async fn enqueue(&self, execution_id: &str) {
        let admitted = {
            let mut state = self.state();
            if state.running.len() < self.capacity {
                state.running.push_back(execution_id.to_string());
                None
            } else {
                let (release, admitted) = oneshot::channel();
                state.waiting.push_back(Waiter {
                    execution_id: execution_id.to_string(),
                    release,
                });
                Some(admitted)
            }
        };

        let Some(admitted) = admitted else {
            return;
        };
        tracing::debug!("Execution {} is waiting for a free slot", execution_id);
        if admitted.await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Free the oldest running slot and admit the next waiter
    ///
    /// Does nothing when nothing is running.
    pub fn dequeue(&self) {
        let mut state = self.state();
        if state.running.pop_front().is_none() {
            return;
        }
        self.admit_waiters(&mut state);
    }

    /// Drop an execution from wherever it is
    ///
    /// A running execution gives its slot to the next waiter.
    pub fn remove(&self, execution_id: &str) {
        let mut state = self.state();
        if Self::drop_execution(&mut state, execution_id) {
            self.admit_waiters(&mut state);
        }
    }

    /// Like [`remove`](Self::remove), without handing the slot on
    pub(crate) fn discard(&self, execution_id: &str) {
        Self::drop_execution(&mut self.state(), execution_id);
    }

    /// Returns whether a running slot was freed
    fn drop_execution(state: &mut QueueState, execution_id: &str) -> bool {
        if let Some(position) = state.running.iter().position(|id| id == execution_id) {
            state.running.remove(position);
            return true;
        }
        state.waiting.retain(|waiter| waiter.execution_id != execution_id);
        false
    }

    fn admit_waiters(&self, state: &mut QueueState) {
        while state.running.len() < self.capacity {
            let Some(waiter) = state.waiting.pop_front() else {
                break;
            };
            // The caller stopped waiting without removing itself
            if waiter.release.send(()).is_err() {
                tracing::debug!("Skipping abandoned waiter {}", waiter.execution_id);
                continue;
            }
            state.running.push_back(waiter.execution_id);
        }
    }

    /// Running ids then waiting ids, each in arrival order
    pub fn get_all(&self) -> Vec<String> {
        let state = self.state();
        state
            .running
            .iter()
            .cloned()
            .chain(state.waiting.iter().map(|waiter| waiter.execution_id.clone()))
            .collect()
    }

    pub fn running(&self) -> Vec<String> {
        self.state().running.iter().cloned().collect()
    }

    pub fn waiting(&self) -> Vec<String> {
        self.state().waiting.iter().map(|waiter| waiter.execution_id.clone()).collect()
    }
}
