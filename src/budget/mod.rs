//! Budget module - token accounting and hierarchical allocation.
//!
//! # Key Concepts
//! - TokenAccount: per-node allocated/consumed tokens
//! - NodeWeight: factors that drive a leaf's proportional share
//! - TokenBalancer: splits the global budget across the tree's leaves

mod account;
mod allocation;
mod weight;

pub use account::{BudgetError, SharedAccount, TokenAccount};
pub use allocation::{
    split_budget, AllocationMap, AllocationRecord, TokenBalancer, TreeShape, UtilizationEntry,
    UtilizationReport,
};
pub use weight::{NodeWeight, WeightFactors, DEFAULT_PRIORITY, MAX_PRIORITY, MIN_PRIORITY};

#[cfg(test)]
pub(crate) use allocation::tests::Shape;
