//! Root orchestrator - top of the agent tree.
//!
//! # Responsibilities
//! 1. Own the token balancer and push its allocations into the leaves
//! 2. Route requests to the subtree that owns the target
//! 3. Run named workflows and keep their history
//! 4. Report status and capabilities for the whole tree

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::managers::InfrastructureRequest;
use super::node::{Coordinator, DispatchContext, InternalNode};
use super::workflow::{run_workflow, WorkflowHistory, WorkflowKind, WorkflowRecord};
use crate::agents::{
    build_tree, collect_leaves, find_by_id, find_by_path, LeafAgent, Node, NodeError, NodeRef,
    NodeRequest, TreeError,
};
use crate::budget::{AllocationMap, TokenBalancer, UtilizationReport, WeightFactors};
use crate::config::Config;
use crate::util::lock;

/// Scope of a rebalance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceKind {
    #[default]
    Full,
    Partial,
}

impl RebalanceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Partial => "partial",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RootRequest {
    Initialize {
        #[serde(default)]
        config_path: Option<String>,
    },
    /// Forward `request` to the manager whose subtree owns `target`
    RouteRequest { target: String, request: Value },
    Rebalance {
        #[serde(rename = "type", default)]
        kind: RebalanceKind,
        /// Dot-separated path of the subtree, for partial rebalances
        #[serde(default)]
        target: Option<String>,
    },
    Status,
    GetCapabilities,
    FullWorkflow {
        workflow_type: String,
        #[serde(default)]
        data: Map<String, Value>,
    },
    SimulateLoad {
        #[serde(default)]
        leaf_id: Option<String>,
    },
}

impl NodeRequest for RootRequest {
    const ACTIONS: &'static [&'static str] = &[
        "initialize",
        "route_request",
        "rebalance",
        "status",
        "get_capabilities",
        "full_workflow",
        "simulate_load",
    ];
}

/// The root orchestrator: an internal node coordinated by `RootCoordinator`.
pub type RootOrchestrator = InternalNode<RootCoordinator>;

/// Nested `{id, name, children}` view of the tree.
fn tree_json(node: NodeRef<'_>) -> Value {
    let mut out = json!({"id": node.id(), "name": node.config().name});
    if let Some((left, right)) = node.children() {
        out["children"] = json!([tree_json(left), tree_json(right)]);
    }
    out
}

/// Subtree prefix of a manager id (`M100` -> `M1`).
fn subtree_prefix(node: NodeRef<'_>) -> &str {
    node.id().as_str().trim_end_matches('0')
}

/// Global state of the tree: the balancer and the workflow history.
pub struct RootCoordinator {
    balancer: Mutex<TokenBalancer>,
    history: Mutex<WorkflowHistory>,
    /// Leaf id -> lifetime consumption already folded into the balancer
    synced: Mutex<HashMap<String, u64>>,
    started: Instant,
    config_path: String,
}

impl RootCoordinator {
    pub fn new(config: &Config) -> Self {
        Self {
            balancer: Mutex::new(TokenBalancer::new(config.total_budget)),
            history: Mutex::new(WorkflowHistory::default()),
            synced: Mutex::new(HashMap::new()),
            started: Instant::now(),
            config_path: config.config_path.clone(),
        }
    }

    /// Distribute the whole budget and push it into the leaves.
    pub fn redistribute(&self, root: NodeRef<'_>) -> AllocationMap {
        let allocations = lock(&self.balancer).balance_tokens(root);
        self.apply_allocations(root, &allocations);
        allocations
    }

    /// Push allocations into the matching leaves.
    ///
    /// Each leaf starts a new period, so anything it spent before belongs to
    /// the replaced records and is marked as synced.
    fn apply_allocations(&self, root: NodeRef<'_>, allocations: &AllocationMap) {
        let mut synced = lock(&self.synced);
        for (id, tokens) in allocations {
            match find_by_id(root, id) {
                Some(leaf) => {
                    leaf.set_allocation(*tokens);
                    synced.insert(id.clone(), leaf.account().lifetime_consumed());
                }
                None => tracing::warn!(leaf = %id, "Allocation for unknown leaf"),
            }
        }
    }

    /// Fold leaf consumption not yet seen into the balancer's records.
    ///
    /// Records may also hold simulated load, so only what each leaf spent
    /// since the last sync is added, read from its lifetime counter.
    fn sync_consumption(&self, root: NodeRef<'_>) {
        let mut balancer = lock(&self.balancer);
        let mut synced = lock(&self.synced);
        for leaf in collect_leaves(root) {
            let id = leaf.id().as_str();
            let lifetime = leaf.account().lifetime_consumed();
            let seen = synced.entry(id.to_string()).or_insert(0);
            let delta = lifetime.saturating_sub(*seen);
            *seen = lifetime;
            if delta > 0 {
                balancer.record_consumption(id, delta);
            }
        }
    }

    pub fn utilization(&self, root: NodeRef<'_>) -> UtilizationReport {
        self.sync_consumption(root);
        lock(&self.balancer).get_utilization_report()
    }

    pub fn allocations(&self) -> AllocationMap {
        lock(&self.balancer).allocations()
    }

    pub fn update_weight(&self, node_id: &str, factors: &WeightFactors) {
        lock(&self.balancer).update_weight(node_id, factors);
    }

    pub fn workflow_history(&self) -> Vec<WorkflowRecord> {
        lock(&self.history).records().to_vec()
    }

    fn rebalance(
        &self,
        root: NodeRef<'_>,
        kind: RebalanceKind,
        target: Option<&str>,
    ) -> Result<Value, NodeError> {
        let (allocations, utilization) = match kind {
            RebalanceKind::Full => {
                let utilization = self.utilization(root);
                let allocations = lock(&self.balancer).rebalance_full(root);
                (allocations, utilization)
            }
            RebalanceKind::Partial => {
                let subtree = find_by_path(root, target.unwrap_or(""))?;
                let utilization = self.utilization(root);
                let allocations = lock(&self.balancer).rebalance_partial(subtree);
                (allocations, utilization)
            }
        };

        self.apply_allocations(root, &allocations);
        tracing::info!(
            kind = kind.as_str(),
            target = target.unwrap_or("-"),
            leaves = allocations.len(),
            "Rebalanced"
        );

        Ok(json!({
            "rebalance_type": kind.as_str(),
            "target": target,
            "allocations": allocations,
            "utilization": utilization,
        }))
    }

    fn simulate_load(&self, root: NodeRef<'_>, leaf_id: Option<&str>) -> Result<Value, NodeError> {
        let leaves: Vec<String> = collect_leaves(root)
            .into_iter()
            .map(|leaf| leaf.id().to_string())
            .collect();

        let targets = match leaf_id {
            Some(id) if leaves.iter().any(|l| l == id) => vec![id.to_string()],
            Some(id) => return Err(NodeError::NotFound(format!("leaf {}", id))),
            None => leaves,
        };

        self.sync_consumption(root);
        let mut balancer = lock(&self.balancer);
        let simulated: BTreeMap<String, u64> = targets
            .into_iter()
            .map(|id| {
                let amount = balancer.simulate_load(&id);
                (id, amount)
            })
            .collect();

        Ok(json!({
            "simulated": simulated,
            "utilization": balancer.get_utilization_report(),
        }))
    }
}

#[async_trait]
impl Coordinator for RootCoordinator {
    type Request = RootRequest;
    const BASE_COST: u64 = 30;

    async fn coordinate(
        &self,
        request: RootRequest,
        ctx: &DispatchContext<'_>,
    ) -> Result<Value, NodeError> {
        let root = ctx.this();

        match request {
            RootRequest::Initialize { config_path } => {
                let config_path = config_path.unwrap_or_else(|| self.config_path.clone());
                let infrastructure = ctx
                    .left(json!({"action": "initialize", "config_path": config_path}))
                    .await
                    .into_value()
                    .map_err(|e| e.context("Infrastructure initialization failed"))?;

                let application = ctx.right(json!({"action": "status"})).await;
                let connected = collect_leaves(root)
                    .into_iter()
                    .filter_map(|node| node.as_leaf())
                    .filter(|leaf| leaf.connect())
                    .count();
                let allocations = self.redistribute(root);

                tracing::info!(leaves = allocations.len(), connected, "System initialized");
                Ok(json!({
                    "infrastructure": infrastructure,
                    "application": application.data_or(Value::Null),
                    "leaves_connected": connected,
                    "token_allocations": allocations,
                    "system_ready": true,
                }))
            }
            RootRequest::RouteRequest { target, request } => {
                let (left, right) = (ctx.left_node(), ctx.right_node());
                let result = if target.starts_with(subtree_prefix(left)) {
                    ctx.left(request).await
                } else if target.starts_with(subtree_prefix(right)) {
                    ctx.right(request).await
                } else {
                    return Err(NodeError::RoutingFailure(format!(
                        "target {} is in neither {} nor {}",
                        target,
                        left.id(),
                        right.id()
                    )));
                };
                result.into_value()
            }
            RootRequest::Rebalance { kind, target } => self.rebalance(root, kind, target.as_deref()),
            RootRequest::Status => {
                let (infrastructure, application) = ctx
                    .both(
                        json!({"action": "system_status"}),
                        json!({"action": "status"}),
                    )
                    .await;

                let leaves: Vec<&str> = collect_leaves(root)
                    .into_iter()
                    .map(|leaf| leaf.id().as_str())
                    .collect();

                Ok(json!({
                    "root": root.id(),
                    "uptime_seconds": self.started.elapsed().as_secs_f64(),
                    "infrastructure": infrastructure.data_or(Value::Null),
                    "application": application.data_or(Value::Null),
                    "tree_structure": tree_json(root),
                    "token_utilization": self.utilization(root),
                    "leaf_nodes": leaves,
                    "workflow_count": lock(&self.history).len(),
                }))
            }
            RootRequest::GetCapabilities => {
                let application = ctx.right(json!({"action": "capabilities"})).await;
                Ok(json!({
                    "application": application.data_or(Value::Null),
                    "infrastructure_actions": InfrastructureRequest::ACTIONS,
                    "root_actions": RootRequest::ACTIONS,
                    "workflows": WorkflowKind::ALL.map(|k| k.as_str()),
                }))
            }
            RootRequest::FullWorkflow {
                workflow_type,
                data,
            } => {
                let kind: WorkflowKind = workflow_type.parse()?;
                ctx.charge(kind.overhead())?;

                let run = run_workflow(kind, data, ctx).await;
                let success = run.success();
                let tokens_used = Self::BASE_COST + ctx.tokens_used();
                let record = lock(&self.history).append(kind, success, tokens_used);

                tracing::info!(
                    workflow = %kind,
                    id = %record.id,
                    success,
                    tokens_used,
                    "Workflow finished"
                );

                let report = json!({
                    "workflow_id": record.id,
                    "workflow_type": kind,
                    "steps": run.steps,
                    "outputs": run.outputs,
                    "tokens_used": tokens_used,
                });

                if !success {
                    return Err(NodeError::PartialFailure {
                        message: format!(
                            "Workflow {} ({}) failed at: {}",
                            record.id,
                            kind,
                            run.failed_steps().join(", ")
                        ),
                        report: Box::new(report),
                    });
                }

                Ok(report)
            }
            RootRequest::SimulateLoad { leaf_id } => self.simulate_load(root, leaf_id.as_deref()),
        }
    }

    fn describe(&self) -> Value {
        json!({
            "uptime_seconds": self.started.elapsed().as_secs_f64(),
            "workflow_count": lock(&self.history).len(),
            "allocations": self.allocations(),
        })
    }
}

impl InternalNode<RootCoordinator> {
    /// Build and validate the full tree with its initial token distribution.
    pub fn build(config: &Config) -> Result<Self, TreeError> {
        build_tree(config)
    }

    fn as_node(&self) -> NodeRef<'_> {
        self
    }

    /// Current allocation of every leaf.
    pub fn allocations(&self) -> AllocationMap {
        self.coordinator().allocations()
    }

    pub fn utilization_report(&self) -> UtilizationReport {
        self.coordinator().utilization(self.as_node())
    }

    pub fn workflow_history(&self) -> Vec<WorkflowRecord> {
        self.coordinator().workflow_history()
    }

    /// Update a node's weight factors. Takes effect on the next redistribution.
    pub fn update_weight(&self, node_id: &str, factors: &WeightFactors) {
        self.coordinator().update_weight(node_id, factors);
    }

    /// Redistribute the whole budget with the current weights.
    pub fn redistribute(&self) -> AllocationMap {
        self.coordinator().redistribute(self.as_node())
    }

    /// Run `initialize` and report whether it succeeded.
    pub async fn initialize_system(&self) -> bool {
        self.process(json!({"action": "initialize"})).await.success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ErrorKind;

    fn root() -> RootOrchestrator {
        RootOrchestrator::build(&Config::default()).unwrap()
    }

    #[tokio::test]
    async fn routes_by_subtree_prefix() {
        let root = root();
        let left = root
            .process(json!({
                "action": "route_request",
                "target": "M122",
                "request": {"action": "get_tenant_data"},
            }))
            .await;
        assert!(left.success);
        assert_eq!(left.data.unwrap()["tenants"].as_array().unwrap().len(), 3);

        let right = root
            .process(json!({
                "action": "route_request",
                "target": "M200",
                "request": {"action": "capabilities"},
            }))
            .await;
        assert!(right.success);
    }

    #[tokio::test]
    async fn unknown_target_is_routing_failure() {
        let root = root();
        let result = root
            .process(json!({"action": "route_request", "target": "M300", "request": {}}))
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::RoutingFailure));
        assert_eq!(result.tokens_used, 30);
    }

    #[tokio::test]
    async fn partial_rebalance_with_bad_path_fails() {
        let root = root();
        let result = root
            .process(json!({"action": "rebalance", "type": "partial", "target": "M100.M999"}))
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::RoutingFailure));
    }

    #[tokio::test]
    async fn partial_rebalance_leaves_other_subtree_alone() {
        let root = root();
        root.update_weight("M111", &WeightFactors::default().with_priority(10));
        let before = root.allocations();

        let result = root
            .process(json!({"action": "rebalance", "type": "partial", "target": "M000.M100"}))
            .await;
        assert!(result.success);

        let after = root.allocations();
        for id in ["M211", "M212", "M221", "M222"] {
            assert_eq!(before[id], after[id], "{id}");
        }
        assert!(after["M111"] > before["M111"]);
        assert_eq!(after.values().sum::<u64>(), 100_000);
    }

    #[tokio::test]
    async fn full_rebalance_pushes_allocations_into_leaves() {
        let root = root();
        root.update_weight("M222", &WeightFactors::default().with_complexity(3.0));

        let result = root.process(json!({"action": "rebalance", "type": "full"})).await;
        assert!(result.success);

        let allocations = root.allocations();
        assert_eq!(allocations.values().sum::<u64>(), 100_000);
        let leaf = find_by_id(&root, "M222").unwrap();
        assert_eq!(leaf.account().allocated(), allocations["M222"]);
    }

    #[tokio::test]
    async fn simulate_load_rejects_unknown_leaf() {
        let root = root();
        let result = root
            .process(json!({"action": "simulate_load", "leaf_id": "M100"}))
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::NotFound));

        let result = root.process(json!({"action": "simulate_load"})).await;
        let data = result.data.unwrap();
        assert_eq!(data["simulated"].as_object().unwrap().len(), 8);
        for entry in data["utilization"].as_object().unwrap().values() {
            let utilization = entry["utilization"].as_f64().unwrap();
            assert!((0.1..=0.9).contains(&utilization));
        }
    }

    #[tokio::test]
    async fn leaf_usage_adds_to_simulated_load() {
        let root = root();
        let query = json!({
            "action": "route_request",
            "target": "M100",
            "request": {"action": "get_tenant_data", "source": "database"},
        });

        let simulated = root
            .process(json!({"action": "simulate_load", "leaf_id": "M122"}))
            .await
            .data
            .unwrap()["simulated"]["M122"]
            .as_u64()
            .unwrap();
        assert!(simulated >= 1_250);

        for _ in 0..5 {
            assert!(root.process(query.clone()).await.success);
        }
        let leaf_consumed = find_by_id(&root, "M122").unwrap().account().consumed();
        assert!(leaf_consumed > 0);
        assert_eq!(root.utilization_report()["M122"].consumed, simulated + leaf_consumed);

        // A second sync adds nothing new
        assert_eq!(root.utilization_report()["M122"].consumed, simulated + leaf_consumed);

        // After a rebalance the leaf and its record both start from zero
        root.process(json!({"action": "rebalance", "type": "full"})).await;
        assert!(root.process(query).await.success);
        let leaf_consumed = find_by_id(&root, "M122").unwrap().account().consumed();
        assert_eq!(root.utilization_report()["M122"].consumed, leaf_consumed);
    }

    #[tokio::test]
    async fn reset_leaf_is_synced_from_zero() {
        let root = root();
        let query = json!({
            "action": "route_request",
            "target": "M200",
            "request": {"action": "execute_tool", "tool": "get_tenant_info"},
        });

        assert!(root.process(query.clone()).await.success);
        let first = root.utilization_report()["M211"].consumed;
        assert!(first > 0);

        let leaf = find_by_id(&root, "M211").unwrap();
        leaf.reset_tokens();
        assert!(root.process(query).await.success);
        let second = leaf.account().consumed();
        assert_eq!(root.utilization_report()["M211"].consumed, first + second);
    }

    #[tokio::test]
    async fn unknown_workflow_is_invalid_request() {
        let root = root();
        let result = root
            .process(json!({"action": "full_workflow", "workflow_type": "nightly"}))
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::InvalidRequest));
        assert!(root.workflow_history().is_empty());
    }

    #[tokio::test]
    async fn workflows_are_recorded_even_when_they_fail() {
        let root = root();

        let synced = root
            .process(json!({"action": "full_workflow", "workflow_type": "data_sync"}))
            .await;
        assert!(synced.success, "{:?}", synced.error);
        assert_eq!(synced.data.unwrap()["outputs"]["sync"]["in_sync"], true);

        let failed = root
            .process(json!({
                "action": "full_workflow",
                "workflow_type": "tenant_report",
                "data": {"tenant_id": 999},
            }))
            .await;
        assert_eq!(failed.error_kind, Some(ErrorKind::ChildFailure));
        assert!(failed.error_text().contains("WF-0002"));
        assert!(failed.error_text().contains("config_load"));

        let report = failed.data.as_ref().unwrap();
        assert_eq!(report["workflow_id"], "WF-0002");
        let flags: Vec<(&str, bool)> = report["steps"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| (s["step"].as_str().unwrap(), s["success"].as_bool().unwrap()))
            .collect();
        assert_eq!(
            flags,
            [("config_load", false), ("tool_process", true), ("report_generate", true)]
        );
        assert!(report["outputs"]["config_load"].is_null());
        assert!(report["outputs"]["report_generate"].is_object());
        assert_eq!(report["tokens_used"], failed.tokens_used);

        let history = root.workflow_history();
        assert_eq!(history.len(), 2);
        assert!(history[0].success);
        assert!(!history[1].success);
        assert!(history[1].tokens_used > 30 + 20);
    }

    #[tokio::test]
    async fn capabilities_list_actions() {
        let root = root();
        let result = root.process(json!({"action": "get_capabilities"})).await;
        let data = result.data.unwrap();
        assert_eq!(data["root_actions"].as_array().unwrap().len(), 7);
        assert_eq!(data["application"]["server"]["tools"].as_array().unwrap().len(), 5);
    }
}
