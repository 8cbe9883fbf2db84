//! Hierarchical token allocation across the leaves of a binary tree.
//!
//! # Algorithm
//! At every internal node the available budget is split between the two
//! subtrees proportionally to their summed leaf weights:
//! `left = floor(B * left_weight / total_weight)`, `right = B - left`.
//! Leaves receive whatever reaches them.
//!
//! # Invariants
//! - The allocations produced by one pass sum exactly to its budget
//! - Subtree weights are memoized per cache epoch; any weight mutation
//!   starts a new epoch, so a stale entry is never read

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;

use super::weight::{NodeWeight, WeightFactors};

/// Leaf id -> allocated tokens.
pub type AllocationMap = BTreeMap<String, u64>;

/// Leaf id -> utilization snapshot.
pub type UtilizationReport = BTreeMap<String, UtilizationEntry>;

/// Utilization above which a leaf's historical usage is raised on full rebalance.
pub const BUSY_THRESHOLD: f64 = 0.8;
/// Utilization below which a leaf's historical usage is lowered on full rebalance.
pub const IDLE_THRESHOLD: f64 = 0.2;
pub const BUSY_FACTOR: f64 = 1.1;
pub const IDLE_FACTOR: f64 = 0.9;

/// Read-only view of a binary tree, as much as the allocator needs.
pub trait TreeShape {
    fn shape_id(&self) -> &str;

    /// `None` for a leaf, `(left, right)` for an internal node.
    fn shape_children(&self) -> Option<(&Self, &Self)>;
}

/// Allocation bookkeeping for one leaf.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationRecord {
    pub node_id: String,
    pub allocated: u64,
    pub consumed: u64,
    pub timestamp: DateTime<Utc>,
}

impl AllocationRecord {
    pub fn new(node_id: impl Into<String>, allocated: u64) -> Self {
        Self {
            node_id: node_id.into(),
            allocated,
            consumed: 0,
            timestamp: Utc::now(),
        }
    }

    /// `consumed / allocated`, or 0 when nothing is allocated.
    pub fn utilization(&self) -> f64 {
        if self.allocated == 0 {
            0.0
        } else {
            self.consumed as f64 / self.allocated as f64
        }
    }

    pub fn remaining(&self) -> u64 {
        self.allocated.saturating_sub(self.consumed)
    }
}

/// One row of the utilization report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UtilizationEntry {
    pub allocated: u64,
    pub consumed: u64,
    pub utilization: f64,
    pub remaining: u64,
}

impl From<&AllocationRecord> for UtilizationEntry {
    fn from(record: &AllocationRecord) -> Self {
        Self {
            allocated: record.allocated,
            consumed: record.consumed,
            utilization: record.utilization(),
            remaining: record.remaining(),
        }
    }
}

/// Split `available` between two subtrees by weight.
///
/// # Postcondition
/// `left + right == available`
///
/// # Pure Function
/// A total weight of zero counts as 1, so the left side gets nothing and the
/// right side everything. A NaN or infinite total is treated the same way.
pub fn split_budget(available: u64, left_weight: f64, right_weight: f64) -> (u64, u64) {
    let total = left_weight + right_weight;

    let left = if total > 0.0 && total.is_finite() {
        let share = (available as f64) * (left_weight / total);
        (share.floor().max(0.0) as u64).min(available)
    } else {
        0
    };

    (left, available - left)
}

/// Owns weights and allocation records for every leaf of the tree.
///
/// Nodes are referenced by id only; the balancer never holds on to them.
#[derive(Debug)]
pub struct TokenBalancer {
    total_budget: u64,
    records: HashMap<String, AllocationRecord>,
    weights: HashMap<String, NodeWeight>,
    /// node id -> (epoch, subtree weight)
    weight_cache: HashMap<String, (u64, f64)>,
    cache_epoch: u64,
}

impl TokenBalancer {
    pub fn new(total_budget: u64) -> Self {
        Self {
            total_budget,
            records: HashMap::new(),
            weights: HashMap::new(),
            weight_cache: HashMap::new(),
            cache_epoch: 0,
        }
    }

    pub fn total_budget(&self) -> u64 {
        self.total_budget
    }

    /// Current cache epoch. Advances on every weight mutation.
    pub fn cache_epoch(&self) -> u64 {
        self.cache_epoch
    }

    /// Distribute the whole budget across the tree.
    pub fn balance_tokens<N: TreeShape + ?Sized>(&mut self, root: &N) -> AllocationMap {
        self.distribute(root, self.total_budget)
    }

    /// Distribute `budget` across the leaves under `node`.
    ///
    /// Leaves outside `node` keep their records.
    pub fn distribute<N: TreeShape + ?Sized>(&mut self, node: &N, budget: u64) -> AllocationMap {
        self.distribute_node(node, budget);
        let mut allocations = AllocationMap::new();
        collect_allocations(self, node, &mut allocations);
        allocations
    }

    fn distribute_node<N: TreeShape + ?Sized>(&mut self, node: &N, available: u64) {
        match node.shape_children() {
            None => {
                let id = node.shape_id();
                self.records
                    .insert(id.to_string(), AllocationRecord::new(id, available));
            }
            Some((left, right)) => {
                let left_weight = self.subtree_weight(left);
                let right_weight = self.subtree_weight(right);
                let (left_budget, right_budget) =
                    split_budget(available, left_weight, right_weight);

                tracing::trace!(
                    node = node.shape_id(),
                    available,
                    left_budget,
                    right_budget,
                    "Split budget"
                );

                self.distribute_node(left, left_budget);
                self.distribute_node(right, right_budget);
            }
        }
    }

    /// Summed leaf weight of the subtree, memoized for the current epoch.
    pub fn subtree_weight<N: TreeShape + ?Sized>(&mut self, node: &N) -> f64 {
        let id = node.shape_id();
        if let Some(&(epoch, weight)) = self.weight_cache.get(id) {
            if epoch == self.cache_epoch {
                return weight;
            }
        }

        let weight = match node.shape_children() {
            None => self.node_weight(id).total_weight(),
            Some((left, right)) => self.subtree_weight(left) + self.subtree_weight(right),
        };

        self.weight_cache
            .insert(id.to_string(), (self.cache_epoch, weight));
        weight
    }

    fn invalidate_cache(&mut self) {
        self.cache_epoch += 1;
    }

    /// O(1) lookup. Unknown ids have no allocation.
    pub fn get_allocation(&self, node_id: &str) -> u64 {
        self.records.get(node_id).map_or(0, |r| r.allocated)
    }

    pub fn record(&self, node_id: &str) -> Option<&AllocationRecord> {
        self.records.get(node_id)
    }

    /// Current weight of a node, defaults when it was never updated.
    pub fn node_weight(&self, node_id: &str) -> NodeWeight {
        self.weights.get(node_id).copied().unwrap_or_default()
    }

    /// Update one or more weight factors. Does not redistribute.
    pub fn update_weight(&mut self, node_id: &str, factors: &WeightFactors) {
        self.weights
            .entry(node_id.to_string())
            .or_default()
            .apply(factors);
        self.invalidate_cache();

        tracing::debug!(node = node_id, ?factors, "Updated weight");
    }

    /// Add to a leaf's consumption. Ignored for leaves without a record.
    pub fn record_consumption(&mut self, node_id: &str, amount: u64) {
        if let Some(record) = self.records.get_mut(node_id) {
            record.consumed = record.consumed.saturating_add(amount);
        }
    }

    /// Recompute every leaf's historical usage from its utilization, then
    /// redistribute the whole budget.
    pub fn rebalance_full<N: TreeShape + ?Sized>(&mut self, root: &N) -> AllocationMap {
        let prior: HashMap<String, f64> = self
            .records
            .iter()
            .map(|(id, record)| (id.clone(), record.utilization()))
            .collect();

        self.records.clear();
        self.adjust_historical_usage(root, &prior);
        self.invalidate_cache();

        let allocations = self.balance_tokens(root);
        tracing::info!(leaves = allocations.len(), "Full rebalance complete");
        allocations
    }

    fn adjust_historical_usage<N: TreeShape + ?Sized>(
        &mut self,
        node: &N,
        prior: &HashMap<String, f64>,
    ) {
        match node.shape_children() {
            Some((left, right)) => {
                self.adjust_historical_usage(left, prior);
                self.adjust_historical_usage(right, prior);
            }
            None => {
                let Some(&utilization) = prior.get(node.shape_id()) else {
                    return;
                };
                let factor = if utilization > BUSY_THRESHOLD {
                    BUSY_FACTOR
                } else if utilization < IDLE_THRESHOLD {
                    IDLE_FACTOR
                } else {
                    return;
                };
                let weight = self.weights.entry(node.shape_id().to_string()).or_default();
                weight.historical_usage *= factor;
            }
        }
    }

    /// Redistribute only the budget currently held by `subtree`.
    pub fn rebalance_partial<N: TreeShape + ?Sized>(&mut self, subtree: &N) -> AllocationMap {
        let budget = self.subtree_budget(subtree);
        self.clear_records(subtree);
        let allocations = self.distribute(subtree, budget);

        tracing::info!(
            subtree = subtree.shape_id(),
            budget,
            "Partial rebalance complete"
        );
        allocations
    }

    /// Sum of the current allocations of the leaves under `node`.
    pub fn subtree_budget<N: TreeShape + ?Sized>(&self, node: &N) -> u64 {
        match node.shape_children() {
            None => self.get_allocation(node.shape_id()),
            Some((left, right)) => self.subtree_budget(left) + self.subtree_budget(right),
        }
    }

    fn clear_records<N: TreeShape + ?Sized>(&mut self, node: &N) {
        match node.shape_children() {
            None => {
                self.records.remove(node.shape_id());
            }
            Some((left, right)) => {
                self.clear_records(left);
                self.clear_records(right);
            }
        }
    }

    /// Every tracked leaf's allocation.
    pub fn allocations(&self) -> AllocationMap {
        self.records
            .iter()
            .map(|(id, record)| (id.clone(), record.allocated))
            .collect()
    }

    pub fn get_utilization_report(&self) -> UtilizationReport {
        self.records
            .iter()
            .map(|(id, record)| (id.clone(), UtilizationEntry::from(record)))
            .collect()
    }

    /// Record a random consumption between 10% and 90% of the leaf's allocation.
    ///
    /// Returns the simulated amount (0 for leaves without an allocation).
    pub fn simulate_load(&mut self, node_id: &str) -> u64 {
        let allocated = self.get_allocation(node_id);
        if allocated == 0 {
            return 0;
        }

        let amount = rand::thread_rng().gen_range(allocated / 10..=allocated * 9 / 10);
        self.record_consumption(node_id, amount);
        amount
    }
}

fn collect_allocations<N: TreeShape + ?Sized>(
    balancer: &TokenBalancer,
    node: &N,
    out: &mut AllocationMap,
) {
    match node.shape_children() {
        None => {
            out.insert(
                node.shape_id().to_string(),
                balancer.get_allocation(node.shape_id()),
            );
        }
        Some((left, right)) => {
            collect_allocations(balancer, left, out);
            collect_allocations(balancer, right, out);
        }
    }
}
