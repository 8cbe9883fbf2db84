//! Core types for the agent tree.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::budget::BudgetError;

/// Identifier of a tree position (e.g. `M121`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl PartialEq<str> for NodeId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for NodeId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Depth of a node in the tree. Children always sit strictly deeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeLevel {
    Root = 0,
    Manager = 1,
    Handler = 2,
    Leaf = 3,
}

impl NodeLevel {
    pub fn depth(&self) -> u8 {
        *self as u8
    }
}

/// Role of a node in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Root orchestrator (top of tree)
    Orchestrator,
    /// Subtree manager (level 1)
    Manager,
    /// Handler coordinating two leaves (level 2)
    Handler,
    /// Leaf bound to an external system
    Interface,
}

impl NodeRole {
    /// Check if this role owns children.
    pub fn is_internal(&self) -> bool {
        !matches!(self, Self::Interface)
    }
}

/// Static identity and shape of a tree position.
///
/// # Invariants
/// - Leaves carry no child ids; internal nodes carry both
/// - Immutable after tree construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: NodeId,
    pub name: String,
    pub level: NodeLevel,
    pub role: NodeRole,
    /// Non-owning back-reference, used for reporting and validation only
    pub parent_id: Option<NodeId>,
    pub left_child_id: Option<NodeId>,
    pub right_child_id: Option<NodeId>,
    /// Initial token budget of the node's own account
    pub token_budget: u64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl NodeConfig {
    /// Configuration for a leaf.
    pub fn leaf(id: &str, name: &str, parent: &str, token_budget: u64) -> Self {
        Self {
            id: NodeId::new(id),
            name: name.to_string(),
            level: NodeLevel::Leaf,
            role: NodeRole::Interface,
            parent_id: Some(NodeId::new(parent)),
            left_child_id: None,
            right_child_id: None,
            token_budget,
            metadata: Map::new(),
        }
    }

    /// Configuration for an internal node.
    pub fn internal(
        id: &str,
        name: &str,
        level: NodeLevel,
        role: NodeRole,
        parent: Option<&str>,
        children: (&str, &str),
        token_budget: u64,
    ) -> Self {
        Self {
            id: NodeId::new(id),
            name: name.to_string(),
            level,
            role,
            parent_id: parent.map(NodeId::new),
            left_child_id: Some(NodeId::new(children.0)),
            right_child_id: Some(NodeId::new(children.1)),
            token_budget,
            metadata: Map::new(),
        }
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Machine-readable error category carried next to the error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownAction,
    RoutingFailure,
    InsufficientTokens,
    ChildFailure,
    InternalFault,
    InvalidRequest,
    NotFound,
}

/// Errors raised inside a node. Never crosses a node boundary: every node
/// converts it into a failed `NodeResult`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Routing failure: {0}")]
    RoutingFailure(String),

    #[error("Insufficient tokens: requested {requested}, remaining {remaining}")]
    InsufficientTokens { requested: u64, remaining: u64 },

    /// Failure text of one or both children, kept verbatim
    #[error("{0}")]
    ChildFailure(String),

    #[error("Internal fault: {0}")]
    InternalFault(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A multi-step run that failed but still has a report to hand back
    #[error("{message}")]
    PartialFailure { message: String, report: Box<Value> },
}

impl NodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownAction(_) => ErrorKind::UnknownAction,
            Self::RoutingFailure(_) => ErrorKind::RoutingFailure,
            Self::InsufficientTokens { .. } => ErrorKind::InsufficientTokens,
            Self::ChildFailure(_) | Self::PartialFailure { .. } => ErrorKind::ChildFailure,
            Self::InternalFault(_) => ErrorKind::InternalFault,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::NotFound(_) => ErrorKind::NotFound,
        }
    }

    /// Report carried by a `PartialFailure`.
    pub fn report(&self) -> Option<&Value> {
        match self {
            Self::PartialFailure { report, .. } => Some(report),
            _ => None,
        }
    }

    /// Wrap a child failure with context, keeping the child's text.
    pub fn context(self, context: &str) -> Self {
        Self::ChildFailure(format!("{}: {}", context, self))
    }
}

impl From<BudgetError> for NodeError {
    fn from(e: BudgetError) -> Self {
        match e {
            BudgetError::InsufficientTokens {
                requested,
                remaining,
            } => Self::InsufficientTokens {
                requested,
                remaining,
            },
        }
    }
}

/// Universal return envelope of `Node::process`.
///
/// # Invariants
/// - `success == true` implies `error.is_none()`
/// - a failed result only carries `data` when the failure came with a report
/// - `tokens_used` counts this node's own cost plus everything its children used
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub success: bool,

    /// Payload (type-specific)
    pub data: Option<Value>,

    pub error: Option<String>,

    pub error_kind: Option<ErrorKind>,

    pub tokens_used: u64,

    /// Node that produced this result
    pub node_id: NodeId,
}

impl NodeResult {
    /// Create a successful result.
    pub fn success(node_id: &NodeId, data: Value, tokens_used: u64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_kind: None,
            tokens_used,
            node_id: node_id.clone(),
        }
    }

    /// Create a failure result. A `PartialFailure` keeps its report as `data`.
    pub fn failure(node_id: &NodeId, error: &NodeError, tokens_used: u64) -> Self {
        Self {
            success: false,
            data: error.report().cloned(),
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            tokens_used,
            node_id: node_id.clone(),
        }
    }

    pub fn from_outcome(
        node_id: &NodeId,
        outcome: Result<Value, NodeError>,
        tokens_used: u64,
    ) -> Self {
        match outcome {
            Ok(data) => Self::success(node_id, data, tokens_used),
            Err(e) => Self::failure(node_id, &e, tokens_used),
        }
    }

    /// Payload of a successful result.
    pub fn ok_data(&self) -> Option<&Value> {
        if self.success {
            self.data.as_ref()
        } else {
            None
        }
    }

    /// Payload of a successful result, or `fallback` for a failed one.
    pub fn data_or(&self, fallback: Value) -> Value {
        self.ok_data().cloned().unwrap_or(fallback)
    }

    /// Error text, empty for successful results.
    pub fn error_text(&self) -> &str {
        self.error.as_deref().unwrap_or("")
    }

    /// Convert a child's result into the parent's control flow.
    ///
    /// A failed child becomes `NodeError::ChildFailure` with the child's
    /// error text unchanged.
    pub fn into_value(self) -> Result<Value, NodeError> {
        if self.success {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            Err(NodeError::ChildFailure(
                self.error.unwrap_or_else(|| format!("{} failed", self.node_id)),
            ))
        }
    }
}
