//! Agents module - the binary node tree.
//!
//! # Node Types
//! - **Internal nodes** (`orchestrator`): own exactly two children and
//!   coordinate them (root, managers, handlers)
//! - **Leaves** (`leaf`): bound to one external system each
//!
//! # Design Principles
//! - Ownership is strictly top-down: a node owns its children by value
//! - Requests are decoded into a closed enum per role before any logic runs
//! - No error or panic crosses a node boundary; callers only see `NodeResult`

mod builder;
mod request;
mod tree;
mod types;
pub mod leaf;
pub mod orchestrator;

pub use builder::{build_tree, LEAF_IDS};
pub use request::{decode_request, NodeRequest};
pub use tree::{collect_leaves, count_nodes, find_by_id, find_by_path, validate_shape, NodeRef, TreeError};
pub use types::{ErrorKind, NodeConfig, NodeError, NodeId, NodeLevel, NodeResult, NodeRole};

use async_trait::async_trait;
use serde_json::Value;

use crate::budget::TokenAccount;

/// Base trait for every tree node.
///
/// # Invariants
/// - `process()` never panics and never returns an error; every failure is a
///   `NodeResult` with `success == false`
/// - `children()` is fixed at construction
#[async_trait]
pub trait Node: Send + Sync {
    /// Static configuration of this node.
    fn config(&self) -> &NodeConfig;

    fn id(&self) -> &NodeId {
        &self.config().id
    }

    /// `(left, right)` for internal nodes, `None` for leaves.
    fn children(&self) -> Option<(NodeRef<'_>, NodeRef<'_>)>;

    fn is_leaf(&self) -> bool {
        self.children().is_none()
    }

    /// Point-in-time copy of the node's token account.
    fn account(&self) -> TokenAccount;

    /// Replace the allocation and start a new accounting period.
    fn set_allocation(&self, tokens: u64);

    /// Clear consumption, keeping the allocation.
    fn reset_tokens(&self);

    /// Status snapshot: at least node id, connection flag (leaves) and tokens remaining.
    fn status(&self) -> Value;

    /// Handle one request.
    ///
    /// # Postconditions
    /// - `result.node_id == self.id()`
    /// - Unknown actions yield `ErrorKind::UnknownAction` carrying the action name
    async fn process(&self, request: Value) -> NodeResult;

    /// Leaf-specific operations, if this node is a leaf.
    fn as_leaf(&self) -> Option<&dyn LeafAgent> {
        None
    }
}

/// Operations only leaves support.
pub trait LeafAgent: Node {
    /// Establish the external binding. Idempotent.
    fn connect(&self) -> bool;

    /// Tear down the external binding. Idempotent.
    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Kind of external system (e.g. `yaml_file`, `database`).
    fn interface_type(&self) -> &'static str;
}
