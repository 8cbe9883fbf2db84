//! # Agent Tree
//!
//! A fixed 15-node binary tree of agents sharing one token budget.
//!
//! This library provides:
//! - A hierarchical token balancer that splits the global budget across the
//!   eight leaves by weight, with full and subtree-scoped rebalancing
//! - A tree router: internal nodes dispatch typed requests to their two
//!   children and aggregate the results
//! - Named multi-step workflows run from the root, with a history log
//!
//! ## Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │  M000 root   │  balancer, workflows
//!                      └──────┬───────┘
//!               ┌─────────────┴─────────────┐
//!        ┌──────┴──────┐             ┌──────┴──────┐
//!        │ M100 infra  │             │ M200 app    │
//!        └──────┬──────┘             └──────┬──────┘
//!         M110      M120               M210      M220
//!       M111 M112 M121 M122          M211 M212 M221 M222
//! ```
//!
//! ## Modules
//! - `agents`: node trait, leaves, internal nodes and tree construction
//! - `budget`: token accounts, weights and the balancer
//! - `scenarios`: demonstration scenarios run by the binary

pub mod agents;
pub mod budget;
pub mod config;
pub mod scenarios;
pub mod util;

pub use agents::orchestrator::RootOrchestrator;
pub use agents::{build_tree, Node, NodeResult};
pub use config::Config;
