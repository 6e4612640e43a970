/// Last activation error per workflow
///
/// Read far more often (every API listing) than written, so it sits behind an
/// ArcSwap like the node type registry.

use arc_swap::ArcSwap;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ActivationErrorsService {
    errors: ArcSwap<HashMap<String, String>>,
}

impl ActivationErrorsService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Workflow id -> error message
    pub fn get_all(&self) -> HashMap<String, String> {
        HashMap::clone(&self.errors.load())
    }

    pub fn get(&self, workflow_id: &str) -> Option<String> {
        self.errors.load().get(workflow_id).cloned()
    }

    pub fn register(&self, workflow_id: &str, message: &str) {
        self.errors.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(workflow_id.to_string(), message.to_string());
            next
        });
    }

    pub fn deregister(&self, workflow_id: &str) {
        if !self.errors.load().contains_key(workflow_id) {
            return;
        }
        self.errors.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(workflow_id);
            next
        });
    }

    pub fn clear_all(&self) {
        self.errors.store(Default::default());
    }
}
