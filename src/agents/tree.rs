//! Tree navigation and shape validation.

use std::collections::HashSet;

use super::{Node, NodeError, NodeId};
use crate::budget::TreeShape;

/// Reference to a node in the tree.
pub type NodeRef<'a> = &'a (dyn Node + 'static);

/// Number of nodes in the standard tree.
pub const EXPECTED_NODES: usize = 15;
/// Number of leaves in the standard tree.
pub const EXPECTED_LEAVES: usize = 8;

impl TreeShape for dyn Node {
    fn shape_id(&self) -> &str {
        self.id().as_str()
    }

    fn shape_children(&self) -> Option<(&Self, &Self)> {
        self.children()
    }
}

/// Resolve a dot-separated chain of ids (e.g. `M000.M100.M110`).
///
/// Segments naming the starting node itself are skipped, so both
/// `M100.M110` and `M000.M100.M110` resolve from the root. An empty path
/// resolves to the starting node.
///
/// # Errors
/// `RoutingFailure` if a segment matches neither child.
pub fn find_by_path<'a>(root: NodeRef<'a>, path: &str) -> Result<NodeRef<'a>, NodeError> {
    let mut current = root;

    for segment in path.split('.').map(str::trim).filter(|s| !s.is_empty()) {
        if segment == root.id().as_str() {
            continue;
        }

        let next = current.children().and_then(|(left, right)| {
            if left.id() == segment {
                Some(left)
            } else if right.id() == segment {
                Some(right)
            } else {
                None
            }
        });

        current = next.ok_or_else(|| {
            NodeError::RoutingFailure(format!(
                "path '{}': no child '{}' under {}",
                path,
                segment,
                current.id()
            ))
        })?;
    }

    Ok(current)
}

/// Find a node anywhere under `root` by its id.
pub fn find_by_id<'a>(root: NodeRef<'a>, id: &str) -> Option<NodeRef<'a>> {
    if root.id() == id {
        return Some(root);
    }
    let (left, right) = root.children()?;
    find_by_id(left, id).or_else(|| find_by_id(right, id))
}

/// Collect every node without children, left to right.
pub fn collect_leaves(root: NodeRef<'_>) -> Vec<NodeRef<'_>> {
    let mut leaves = Vec::new();
    walk(root, &mut |node| {
        if node.is_leaf() {
            leaves.push(node);
        }
    });
    leaves
}

pub fn count_nodes(root: NodeRef<'_>) -> usize {
    let mut count = 0;
    walk(root, &mut |_| count += 1);
    count
}

/// Pre-order traversal.
pub fn walk<'a>(node: NodeRef<'a>, visit: &mut dyn FnMut(NodeRef<'a>)) {
    visit(node);
    if let Some((left, right)) = node.children() {
        walk(left, visit);
        walk(right, visit);
    }
}

/// Check the fixed 15-node binary shape.
///
/// # Checks
/// - 15 nodes, 8 leaves, unique ids
/// - Configured child ids match the wired children, and each child names
///   its parent
/// - Levels strictly increase from parent to child
/// - Leaves declare no child ids
pub fn validate_shape(root: NodeRef<'_>) -> Result<(), TreeError> {
    let mut seen = HashSet::new();
    let mut result = Ok(());

    walk(root, &mut |node| {
        if result.is_err() {
            return;
        }
        result = check_node(node, &mut seen);
    });
    result?;

    let nodes = count_nodes(root);
    if nodes != EXPECTED_NODES {
        return Err(TreeError::NodeCount {
            expected: EXPECTED_NODES,
            found: nodes,
        });
    }

    let leaves = collect_leaves(root).len();
    if leaves != EXPECTED_LEAVES {
        return Err(TreeError::LeafCount {
            expected: EXPECTED_LEAVES,
            found: leaves,
        });
    }

    Ok(())
}

fn check_node(node: NodeRef<'_>, seen: &mut HashSet<NodeId>) -> Result<(), TreeError> {
    let config = node.config();

    if !seen.insert(config.id.clone()) {
        return Err(TreeError::DuplicateId(config.id.clone()));
    }

    match node.children() {
        None => {
            if config.left_child_id.is_some() || config.right_child_id.is_some() {
                return Err(TreeError::ChildMismatch {
                    node: config.id.clone(),
                    expected: config.left_child_id.clone(),
                    found: None,
                });
            }
        }
        Some((left, right)) => {
            for (expected, child) in [(&config.left_child_id, left), (&config.right_child_id, right)] {
                if expected.as_ref() != Some(child.id()) {
                    return Err(TreeError::ChildMismatch {
                        node: config.id.clone(),
                        expected: expected.clone(),
                        found: Some(child.id().clone()),
                    });
                }
                if child.config().parent_id.as_ref() != Some(&config.id) {
                    return Err(TreeError::ParentMismatch {
                        node: child.id().clone(),
                        expected: config.id.clone(),
                    });
                }
                if child.config().level <= config.level {
                    return Err(TreeError::LevelOrder {
                        parent: config.id.clone(),
                        child: child.id().clone(),
                    });
                }
            }
        }
    }

    Ok(())
}

/// Errors in tree construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("Expected {expected} nodes, found {found}")]
    NodeCount { expected: usize, found: usize },

    #[error("Expected {expected} leaves, found {found}")]
    LeafCount { expected: usize, found: usize },

    #[error("Duplicate node id: {0}")]
    DuplicateId(NodeId),

    #[error("Node {node}: expected child {expected:?}, found {found:?}")]
    ChildMismatch {
        node: NodeId,
        expected: Option<NodeId>,
        found: Option<NodeId>,
    },

    #[error("Node {node} does not name {expected} as its parent")]
    ParentMismatch { node: NodeId, expected: NodeId },

    #[error("Child {child} is not deeper than its parent {parent}")]
    LevelOrder { parent: NodeId, child: NodeId },

    #[error("Unknown leaf in weight settings: {0}")]
    UnknownLeaf(String),
}
