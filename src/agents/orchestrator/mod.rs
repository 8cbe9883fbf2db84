//! Orchestrator agents - the internal nodes that coordinate the tree.
//!
//! Every internal node is an `InternalNode` parameterised by the
//! `Coordinator` that gives it its role: root, manager or handler.

mod handlers;
mod managers;
mod node;
mod root;
mod workflow;

pub use handlers::{
    ConfigHandler, ConfigHandlerRequest, DataHandler, DataHandlerRequest, OutputHandler,
    OutputHandlerRequest, ServerHandler, ServerHandlerRequest, TenantSource,
};
pub use managers::{
    ApplicationManager, ApplicationRequest, InfrastructureManager, InfrastructureRequest,
    RequestType,
};
pub use node::{merge_results, Coordinator, DispatchContext, InternalNode};
pub use root::{RebalanceKind, RootCoordinator, RootOrchestrator, RootRequest};
pub use workflow::{StepOutcome, WorkflowHistory, WorkflowKind, WorkflowRecord};
