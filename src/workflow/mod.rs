/// Workflow Management Layer
///
/// Workflow records as stored, their petgraph view with resolved node
/// capabilities, the node type registry and SQLite persistence.

// Core workflow type definitions
pub mod types;

// Petgraph view with resolved node kinds
pub mod graph;

// Lock-free node type registry using ArcSwap
pub mod node_types;

// SQLite persistence layer for workflow storage
pub mod storage;

// Re-export commonly used types
pub use graph::WorkflowGraph;
pub use node_types::NodeTypes;
pub use types::{ActivationMode, ExecutionMode, Node, WorkflowRecord};
