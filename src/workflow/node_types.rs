/// Hot-swappable node type registry using ArcSwap
///
/// Node types are looked up on every activation but registered rarely (startup,
/// plugin load). Reads are lock-free; a registration clones the map and swaps
/// the pointer, so in-flight activations keep the snapshot they started with.

use crate::nodes::{NodeKind, NodeTypeDescriptor};
use arc_swap::ArcSwap;
use std::collections::HashMap;

/// Lock-free node type registry
///
/// Key: `(type name, version)`.
#[derive(Debug, Default)]
pub struct NodeTypes {
    types: ArcSwap<HashMap<(String, u32), NodeTypeDescriptor>>,
}

impl NodeTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a node type
    pub fn register(&self, descriptor: NodeTypeDescriptor) {
        let key = (descriptor.name.clone(), descriptor.version);
        self.types.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(key.clone(), descriptor.clone());
            next
        });
        tracing::debug!("Registered node type {}@{}", descriptor.name, descriptor.version);
    }

    /// Resolve a node type by name and version
    pub fn get_by_name_and_version(&self, name: &str, version: u32) -> Option<NodeTypeDescriptor> {
        self.types.load().get(&(name.to_string(), version)).cloned()
    }

    /// Capability of a node type, if it's known
    pub fn kind_of(&self, name: &str, version: u32) -> Option<NodeKind> {
        self.get_by_name_and_version(name, version).map(|descriptor| descriptor.kind)
    }

    pub fn len(&self) -> usize {
        self.types.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.load().is_empty()
    }
}
