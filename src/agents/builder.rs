//! Construction of the standard 15-node tree.
//!
//! ```text
//!                      M000 root
//!            M100                      M200
//!      M110        M120          M210        M220
//!   M111  M112  M121  M122    M211  M212  M221  M222
//! ```

use super::leaf::{
    ConfigStore, LeafInterface, LeafNode, LogWriter, ReportGenerator, ResourceLibrary, SheetStore,
    TenantDatabase, ToolServer, WebGateway,
};
use super::orchestrator::{
    ApplicationManager, ConfigHandler, Coordinator, DataHandler, InfrastructureManager,
    InternalNode, OutputHandler, RootCoordinator, RootOrchestrator, ServerHandler,
};
use super::{validate_shape, Node, NodeConfig, NodeLevel, NodeRole, TreeError};
use crate::config::Config;

/// Every leaf id, left to right.
pub const LEAF_IDS: [&str; 8] = [
    "M111", "M112", "M121", "M122", "M211", "M212", "M221", "M222",
];

fn leaf<I: LeafInterface>(id: &str, name: &str, parent: &str, budget: u64) -> Box<dyn Node> {
    Box::new(LeafNode::<I>::new(NodeConfig::leaf(id, name, parent, budget)))
}

struct Wiring {
    parallel: bool,
}

impl Wiring {
    #[allow(clippy::too_many_arguments)]
    fn internal<C: Coordinator>(
        &self,
        id: &str,
        name: &str,
        level: NodeLevel,
        parent: &str,
        budget: u64,
        coordinator: C,
        left: Box<dyn Node>,
        right: Box<dyn Node>,
    ) -> Box<dyn Node> {
        let role = match level {
            NodeLevel::Manager => NodeRole::Manager,
            _ => NodeRole::Handler,
        };
        let config = NodeConfig::internal(
            id,
            name,
            level,
            role,
            Some(parent),
            (left.id().as_str(), right.id().as_str()),
            budget,
        );
        Box::new(InternalNode::new(config, coordinator, left, right).with_parallel_fanout(self.parallel))
    }
}

/// Build, validate and fund the tree.
///
/// Initial weight factors from `config` are applied before the first
/// distribution, whose allocations are pushed into the leaves.
///
/// # Errors
/// `TreeError` if the wiring is inconsistent or a weight names an unknown leaf.
pub fn build_tree(config: &Config) -> Result<RootOrchestrator, TreeError> {
    let wiring = Wiring {
        parallel: config.parallel_fanout,
    };

    let config_handler = wiring.internal(
        "M110",
        "Config Handler",
        NodeLevel::Handler,
        "M100",
        10_000,
        ConfigHandler,
        leaf::<ConfigStore>("M111", "Config Store", "M110", 5_000),
        leaf::<LogWriter>("M112", "Log Writer", "M110", 3_000),
    );
    let data_handler = wiring.internal(
        "M120",
        "Data Handler",
        NodeLevel::Handler,
        "M100",
        20_000,
        DataHandler,
        leaf::<SheetStore>("M121", "Spreadsheet Store", "M120", 8_000),
        leaf::<TenantDatabase>("M122", "Tenant Database", "M120", 10_000),
    );
    let server_handler = wiring.internal(
        "M210",
        "Server Handler",
        NodeLevel::Handler,
        "M200",
        25_000,
        ServerHandler,
        leaf::<ToolServer>("M211", "Tool Server", "M210", 15_000),
        leaf::<ResourceLibrary>("M212", "Resource Library", "M210", 8_000),
    );
    let output_handler = wiring.internal(
        "M220",
        "Output Handler",
        NodeLevel::Handler,
        "M200",
        25_000,
        OutputHandler,
        leaf::<WebGateway>("M221", "Web Gateway", "M220", 12_000),
        leaf::<ReportGenerator>("M222", "Report Generator", "M220", 10_000),
    );

    let infrastructure = wiring.internal(
        "M100",
        "Infrastructure Manager",
        NodeLevel::Manager,
        "M000",
        35_000,
        InfrastructureManager::default(),
        config_handler,
        data_handler,
    );
    let application = wiring.internal(
        "M200",
        "Application Manager",
        NodeLevel::Manager,
        "M000",
        55_000,
        ApplicationManager,
        server_handler,
        output_handler,
    );

    let root_config = NodeConfig::internal(
        "M000",
        "Root Orchestrator",
        NodeLevel::Root,
        NodeRole::Orchestrator,
        None,
        ("M100", "M200"),
        config.total_budget,
    );
    let root = InternalNode::new(
        root_config,
        RootCoordinator::new(config),
        infrastructure,
        application,
    )
    .with_parallel_fanout(config.parallel_fanout);

    validate_shape(&root)?;

    for (leaf_id, factors) in &config.initial_weights {
        if !LEAF_IDS.contains(&leaf_id.as_str()) {
            return Err(TreeError::UnknownLeaf(leaf_id.clone()));
        }
        root.update_weight(leaf_id, factors);
    }

    let allocations = root.redistribute();
    tracing::info!(
        total_budget = config.total_budget,
        leaves = allocations.len(),
        "Agent tree built"
    );

    Ok(root)
}
