//! Internal node - owns two children and coordinates them.
//!
//! An internal node is generic over a `Coordinator`, the role-specific logic
//! (manager, handler or root). The node itself takes care of everything
//! common to all roles:
//! - Charging its own base cost before dispatching
//! - Decoding the request into the role's closed request enum
//! - Summing the tokens its children used
//! - Converting errors and panics into a failed `NodeResult`

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Value};

use crate::agents::{
    decode_request, Node, NodeConfig, NodeError, NodeRef, NodeRequest, NodeResult,
};
use crate::budget::{SharedAccount, TokenAccount};
use crate::util::panic_message;

/// Role-specific logic of an internal node.
#[async_trait]
pub trait Coordinator: Send + Sync + 'static {
    type Request: NodeRequest + Send;

    /// Tokens the node charges itself for every request.
    const BASE_COST: u64;

    /// Handle one decoded request, calling children through `ctx`.
    async fn coordinate(
        &self,
        request: Self::Request,
        ctx: &DispatchContext<'_>,
    ) -> Result<Value, NodeError>;

    /// Role-specific status details.
    fn describe(&self) -> Value {
        Value::Null
    }
}

/// Handle a coordinator uses to reach its children during one request.
///
/// Every child call is counted, so the node can report its own cost plus
/// everything spent below it.
pub struct DispatchContext<'a> {
    this: NodeRef<'a>,
    left: NodeRef<'a>,
    right: NodeRef<'a>,
    account: &'a SharedAccount,
    parallel: bool,
    child_tokens: AtomicU64,
    surcharge: AtomicU64,
}

impl<'a> DispatchContext<'a> {
    fn new(
        this: NodeRef<'a>,
        (left, right): (NodeRef<'a>, NodeRef<'a>),
        account: &'a SharedAccount,
        parallel: bool,
    ) -> Self {
        Self {
            this,
            left,
            right,
            account,
            parallel,
            child_tokens: AtomicU64::new(0),
            surcharge: AtomicU64::new(0),
        }
    }

    /// The node being dispatched.
    pub fn this(&self) -> NodeRef<'a> {
        self.this
    }

    pub fn left_node(&self) -> NodeRef<'a> {
        self.left
    }

    pub fn right_node(&self) -> NodeRef<'a> {
        self.right
    }

    pub async fn left(&self, request: Value) -> NodeResult {
        let result = self.left.process(request).await;
        self.count(result)
    }

    pub async fn right(&self, request: Value) -> NodeResult {
        let result = self.right.process(request).await;
        self.count(result)
    }

    /// Query both children. Concurrent when parallel fan-out is enabled,
    /// otherwise left then right.
    pub async fn both(&self, left: Value, right: Value) -> (NodeResult, NodeResult) {
        if self.parallel {
            tokio::join!(self.left(left), self.right(right))
        } else {
            let left = self.left(left).await;
            let right = self.right(right).await;
            (left, right)
        }
    }

    /// Query both children and merge their results.
    pub async fn merge(&self, left: Value, right: Value) -> Result<Value, NodeError> {
        let (left, right) = self.both(left, right).await;
        merge_results(left, right)
    }

    /// Charge extra tokens to this node's own account.
    pub fn charge(&self, amount: u64) -> Result<(), NodeError> {
        self.account.consume(amount)?;
        self.surcharge.fetch_add(amount, Ordering::Relaxed);
        Ok(())
    }

    /// Tokens used so far by children and surcharges, excluding the base cost.
    pub fn tokens_used(&self) -> u64 {
        self.child_tokens.load(Ordering::Relaxed) + self.surcharge.load(Ordering::Relaxed)
    }

    fn count(&self, result: NodeResult) -> NodeResult {
        self.child_tokens
            .fetch_add(result.tokens_used, Ordering::Relaxed);
        result
    }
}

/// Binary merge of two child results.
///
/// Fails only when both children failed, with both error texts. Otherwise
/// the payload is `{left, right}` with `null` on a failed side.
pub fn merge_results(left: NodeResult, right: NodeResult) -> Result<Value, NodeError> {
    if !left.success && !right.success {
        return Err(NodeError::ChildFailure(format!(
            "Both children failed: {}, {}",
            left.error_text(),
            right.error_text()
        )));
    }

    Ok(json!({
        "left": left.ok_data().cloned().unwrap_or(Value::Null),
        "right": right.ok_data().cloned().unwrap_or(Value::Null),
    }))
}

/// A node with exactly two children, wired once at construction.
pub struct InternalNode<C: Coordinator> {
    config: NodeConfig,
    account: SharedAccount,
    left: Box<dyn Node>,
    right: Box<dyn Node>,
    parallel: bool,
    coordinator: C,
}

impl<C: Coordinator> InternalNode<C> {
    pub fn new(config: NodeConfig, coordinator: C, left: Box<dyn Node>, right: Box<dyn Node>) -> Self {
        Self {
            account: SharedAccount::new(config.token_budget),
            config,
            left,
            right,
            parallel: true,
            coordinator,
        }
    }

    /// Toggle concurrent fan-out to both children.
    pub fn with_parallel_fanout(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn coordinator(&self) -> &C {
        &self.coordinator
    }

    pub fn left(&self) -> NodeRef<'_> {
        &*self.left
    }

    pub fn right(&self) -> NodeRef<'_> {
        &*self.right
    }
}

#[async_trait]
impl<C: Coordinator> Node for InternalNode<C> {
    fn config(&self) -> &NodeConfig {
        &self.config
    }

    fn children(&self) -> Option<(NodeRef<'_>, NodeRef<'_>)> {
        Some((&*self.left, &*self.right))
    }

    fn account(&self) -> TokenAccount {
        self.account.snapshot()
    }

    fn set_allocation(&self, tokens: u64) {
        self.account.set_allocation(tokens);
    }

    fn reset_tokens(&self) {
        self.account.reset();
    }

    fn status(&self) -> Value {
        let account = self.account.snapshot();
        json!({
            "node_id": self.config.id,
            "name": self.config.name,
            "level": self.config.level,
            "role": self.config.role,
            "children": [self.left.id(), self.right.id()],
            "tokens_allocated": account.allocated(),
            "tokens_consumed": account.consumed(),
            "tokens_remaining": account.remaining(),
            "details": self.coordinator.describe(),
        })
    }

    async fn process(&self, request: Value) -> NodeResult {
        let id = &self.config.id;

        if let Err(e) = self.account.consume(C::BASE_COST) {
            let err = NodeError::from(e);
            tracing::warn!(node = %id, error = %err, "Rejected request");
            return NodeResult::failure(id, &err, 0);
        }

        tracing::debug!(node = %id, action = ?request.get("action"), "Dispatching request");

        let ctx = DispatchContext::new(
            self,
            (&*self.left, &*self.right),
            &self.account,
            self.parallel,
        );

        let outcome = match decode_request::<C::Request>(request) {
            Ok(request) => AssertUnwindSafe(self.coordinator.coordinate(request, &ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(NodeError::InternalFault(panic_message(payload)))),
            Err(err) => Err(err),
        };

        if let Err(err) = &outcome {
            tracing::warn!(node = %id, error = %err, "Request failed");
        }

        NodeResult::from_outcome(id, outcome, C::BASE_COST + ctx.tokens_used())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::leaf::tests::probe_leaf;
    use crate::agents::{ErrorKind, NodeId};
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(tag = "action", rename_all = "snake_case")]
    enum PairRequest {
        Both { left: Value, right: Value },
        Left { request: Value },
        Surcharge { amount: u64 },
        Explode,
    }

    impl NodeRequest for PairRequest {
        const ACTIONS: &'static [&'static str] = &["both", "left", "surcharge", "explode"];
    }

    struct Pair;

    #[async_trait]
    impl Coordinator for Pair {
        type Request = PairRequest;
        const BASE_COST: u64 = 5;

        async fn coordinate(
            &self,
            request: PairRequest,
            ctx: &DispatchContext<'_>,
        ) -> Result<Value, NodeError> {
            match request {
                PairRequest::Both { left, right } => ctx.merge(left, right).await,
                PairRequest::Left { request } => ctx.left(request).await.into_value(),
                PairRequest::Surcharge { amount } => {
                    ctx.charge(amount)?;
                    Ok(json!({"charged": amount}))
                }
                PairRequest::Explode => panic!("coordinator exploded"),
            }
        }
    }

    fn pair(budget: u64, parallel: bool) -> InternalNode<Pair> {
        let config = NodeConfig::internal(
            "M990",
            "Pair",
            crate::agents::NodeLevel::Handler,
            crate::agents::NodeRole::Handler,
            None,
            ("M999", "M999"),
            budget,
        );
        InternalNode::new(config, Pair, Box::new(probe_leaf(100)), Box::new(probe_leaf(100)))
            .with_parallel_fanout(parallel)
    }

    #[test]
    fn merge_keeps_partial_success() {
        let id = NodeId::new("M1");
        let ok = NodeResult::success(&id, json!(1), 10);
        let failed = NodeResult::failure(&id, &NodeError::NotFound("x".into()), 10);

        assert_eq!(
            merge_results(ok, failed.clone()),
            Ok(json!({"left": 1, "right": null}))
        );

        let err = merge_results(failed.clone(), failed).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Both children failed: Not found: x, Not found: x"
        );
    }

    #[tokio::test]
    async fn tokens_include_children_even_when_they_fail() {
        for parallel in [true, false] {
            let node = pair(100, parallel);
            let result = node
                .process(json!({
                    "action": "both",
                    "left": {"action": "costly", "extra": 3},
                    "right": {"action": "missing"},
                }))
                .await;

            assert!(result.success);
            // 5 own + 13 left + 10 right
            assert_eq!(result.tokens_used, 28);
            assert_eq!(result.data.unwrap()["left"]["extra"], 3);
        }
    }

    #[tokio::test]
    async fn both_failed_children_fail_the_merge() {
        let node = pair(100, true);
        let result = node
            .process(json!({
                "action": "both",
                "left": {"action": "missing"},
                "right": {"action": "bogus"},
            }))
            .await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::ChildFailure));
        assert!(result.error_text().contains("999"));
        assert!(result.error_text().contains("bogus"));
        assert_eq!(result.tokens_used, 25);
    }

    #[tokio::test]
    async fn child_failure_text_is_verbatim() {
        let node = pair(100, true);
        let result = node
            .process(json!({"action": "left", "request": {"action": "missing"}}))
            .await;
        assert_eq!(result.error_text(), "Not found: record 999");
        assert_eq!(result.node_id, "M990");
    }

    #[tokio::test]
    async fn unknown_action_charges_base_only() {
        let node = pair(100, true);
        let result = node.process(json!({"action": "bogus"})).await;
        assert!(!result.success);
        assert!(result.error_text().contains("bogus"));
        assert_eq!(result.tokens_used, 5);
        assert_eq!(node.account().consumed(), 5);
    }

    #[tokio::test]
    async fn exhausted_node_rejects_without_dispatch() {
        let node = pair(4, true);
        let result = node
            .process(json!({"action": "left", "request": {"action": "echo", "value": 1}}))
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::InsufficientTokens));
        assert_eq!(result.tokens_used, 0);
        assert_eq!(node.left().account().consumed(), 0);
    }

    #[tokio::test]
    async fn surcharge_is_reported_and_bounded() {
        let node = pair(50, true);
        let result = node.process(json!({"action": "surcharge", "amount": 20})).await;
        assert_eq!(result.tokens_used, 25);

        let result = node.process(json!({"action": "surcharge", "amount": 100})).await;
        assert_eq!(result.error_kind, Some(ErrorKind::InsufficientTokens));
        assert_eq!(result.tokens_used, 5);
    }

    #[tokio::test]
    async fn coordinator_panic_becomes_internal_fault() {
        let node = pair(100, true);
        let result = node.process(json!({"action": "explode"})).await;
        assert_eq!(result.error_kind, Some(ErrorKind::InternalFault));
        assert!(result.error_text().contains("coordinator exploded"));
    }
}
