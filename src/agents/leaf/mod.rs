//! Leaf nodes - each one bound to a single external system.
//!
//! # Leaves
//! - `ConfigStore` (M111): YAML configuration documents
//! - `LogWriter` (M112): log files
//! - `SheetStore` (M121): spreadsheet workbooks
//! - `TenantDatabase` (M122): tenant and payment tables
//! - `ToolServer` (M211): callable tools
//! - `ResourceLibrary` (M212): prompts, schemas and templates
//! - `WebGateway` (M221): REST endpoints
//! - `ReportGenerator` (M222): generated documents
//!
//! The external systems are in-memory stand-ins. What matters to the tree is
//! the contract: typed requests, a base token cost plus a size-dependent
//! extra, and failures that never escape `process`.

mod config_store;
mod database;
mod log_writer;
mod report;
mod resources;
mod sheet;
mod tools;
mod web;

pub use config_store::{ConfigStore, ConfigStoreRequest};
pub use database::{DatabaseRequest, Payment, Tenant, TenantDatabase};
pub use log_writer::{LogLevel, LogWriter, LogWriterRequest};
pub use report::{ReportGenerator, ReportKind, ReportRequest};
pub use resources::{ResourceLibrary, ResourceRequest};
pub use sheet::{SheetRequest, SheetStore};
pub use tools::{ToolRequest, ToolServer};
pub use web::{WebGateway, WebRequest};

pub(crate) use sheet::TENANT_WORKBOOK;
pub(crate) use web::ENDPOINTS as WEB_ENDPOINTS;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::agents::{
    decode_request, LeafAgent, Node, NodeConfig, NodeError, NodeRef, NodeRequest, NodeResult,
};
use crate::budget::{SharedAccount, TokenAccount};
use crate::util::{lock, panic_message};

/// What a leaf's external system returned for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafOutput {
    pub data: Value,
    /// Size-dependent cost on top of the base cost
    pub extra_cost: u64,
}

impl LeafOutput {
    pub fn new(data: Value, extra_cost: u64) -> Self {
        Self { data, extra_cost }
    }
}

/// An external system a leaf is bound to.
///
/// `Default` produces a freshly connected binding.
pub trait LeafInterface: Default + Send + 'static {
    type Request: NodeRequest + Send;

    const INTERFACE_TYPE: &'static str;

    /// Tokens charged for every request, successful or not.
    const BASE_COST: u64;

    fn handle(&mut self, request: Self::Request) -> Result<LeafOutput, NodeError>;

    /// Interface-specific status details.
    fn describe(&self) -> Value;
}

/// Connection lifecycle of a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Unconfigured,
    Connected,
    /// Connected and has served at least one request
    Active,
}

struct Binding<I> {
    state: ConnectionState,
    interface: Option<I>,
}

impl<I: LeafInterface> Binding<I> {
    fn connect(&mut self) -> &mut I {
        if self.interface.is_none() {
            self.state = ConnectionState::Connected;
        }
        self.interface.get_or_insert_with(I::default)
    }
}

/// A leaf node wrapping one `LeafInterface`.
///
/// # Token Accounting
/// - Rejected up front with `InsufficientTokens` (0 tokens used) if the base
///   cost is no longer affordable
/// - On success, base + extra cost is consumed atomically
/// - On failure, only the base cost is consumed
pub struct LeafNode<I: LeafInterface> {
    config: NodeConfig,
    account: SharedAccount,
    binding: Mutex<Binding<I>>,
}

impl<I: LeafInterface> LeafNode<I> {
    pub fn new(config: NodeConfig) -> Self {
        let config = config.with_metadata("interface", I::INTERFACE_TYPE);
        Self {
            account: SharedAccount::new(config.token_budget),
            config,
            binding: Mutex::new(Binding {
                state: ConnectionState::Unconfigured,
                interface: None,
            }),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        lock(&self.binding).state
    }

    fn run(&self, request: Value) -> Result<LeafOutput, NodeError> {
        let mut binding = lock(&self.binding);
        let interface = binding.connect();
        let request = decode_request::<I::Request>(request)?;
        let output = interface.handle(request)?;
        binding.state = ConnectionState::Active;
        Ok(output)
    }

    /// Charge the base cost of a failed call, if it is still affordable.
    fn charge_base(&self) -> u64 {
        match self.account.consume(I::BASE_COST) {
            Ok(()) => I::BASE_COST,
            Err(_) => 0,
        }
    }
}

#[async_trait]
impl<I: LeafInterface> Node for LeafNode<I> {
    fn config(&self) -> &NodeConfig {
        &self.config
    }

    fn children(&self) -> Option<(NodeRef<'_>, NodeRef<'_>)> {
        None
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
        let binding = lock(&self.binding);
        json!({
            "node_id": self.config.id,
            "name": self.config.name,
            "level": self.config.level,
            "interface_type": I::INTERFACE_TYPE,
            "connected": binding.interface.is_some(),
            "state": binding.state,
            "tokens_allocated": account.allocated(),
            "tokens_consumed": account.consumed(),
            "tokens_remaining": account.remaining(),
            "interface": binding.interface.as_ref().map(I::describe),
        })
    }

    async fn process(&self, request: Value) -> NodeResult {
        let id = &self.config.id;

        if let Err(e) = self.account.ensure_affordable(I::BASE_COST) {
            let err = NodeError::from(e);
            tracing::warn!(node = %id, error = %err, "Rejected request");
            return NodeResult::failure(id, &err, 0);
        }

        tracing::debug!(node = %id, action = ?request.get("action"), "Leaf processing request");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run(request)))
            .unwrap_or_else(|payload| Err(NodeError::InternalFault(panic_message(payload))));

        match outcome {
            Ok(output) => {
                let cost = I::BASE_COST + output.extra_cost;
                match self.account.consume(cost) {
                    Ok(()) => NodeResult::success(id, output.data, cost),
                    Err(e) => {
                        let err = NodeError::from(e);
                        tracing::warn!(node = %id, error = %err, "Result exceeds allocation");
                        NodeResult::failure(id, &err, self.charge_base())
                    }
                }
            }
            Err(err) => {
                tracing::warn!(node = %id, error = %err, "Leaf request failed");
                NodeResult::failure(id, &err, self.charge_base())
            }
        }
    }

    fn as_leaf(&self) -> Option<&dyn LeafAgent> {
        Some(self)
    }
}

impl<I: LeafInterface> LeafAgent for LeafNode<I> {
    fn connect(&self) -> bool {
        lock(&self.binding).connect();
        true
    }

    fn disconnect(&self) {
        let mut binding = lock(&self.binding);
        binding.interface = None;
        binding.state = ConnectionState::Unconfigured;
    }

    fn is_connected(&self) -> bool {
        lock(&self.binding).interface.is_some()
    }

    fn interface_type(&self) -> &'static str {
        I::INTERFACE_TYPE
    }
}

/// Cost of moving `bytes` at one token per `per` bytes.
pub(crate) fn size_cost(bytes: u64, per: u64) -> u64 {
    bytes / per.max(1)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::agents::ErrorKind;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(tag = "action", rename_all = "snake_case")]
    pub(crate) enum ProbeRequest {
        Echo { value: Value },
        Costly { extra: u64 },
        Missing,
        Explode,
    }

    impl NodeRequest for ProbeRequest {
        const ACTIONS: &'static [&'static str] = &["echo", "costly", "missing", "explode"];
    }

    /// Interface double with controllable cost and failure modes.
    #[derive(Default)]
    pub(crate) struct Probe {
        handled: u64,
    }

    impl LeafInterface for Probe {
        type Request = ProbeRequest;
        const INTERFACE_TYPE: &'static str = "probe";
        const BASE_COST: u64 = 10;

        fn handle(&mut self, request: ProbeRequest) -> Result<LeafOutput, NodeError> {
            self.handled += 1;
            match request {
                ProbeRequest::Echo { value } => Ok(LeafOutput::new(value, 0)),
                ProbeRequest::Costly { extra } => Ok(LeafOutput::new(json!({"extra": extra}), extra)),
                ProbeRequest::Missing => Err(NodeError::NotFound("record 999".into())),
                ProbeRequest::Explode => panic!("probe exploded"),
            }
        }

        fn describe(&self) -> Value {
            json!({"handled": self.handled})
        }
    }

    pub(crate) fn probe_leaf(budget: u64) -> LeafNode<Probe> {
        LeafNode::new(NodeConfig::leaf("M999", "Probe", "M990", budget))
    }

    #[tokio::test]
    async fn success_consumes_base_plus_extra() {
        let leaf = probe_leaf(100);
        let result = leaf.process(json!({"action": "costly", "extra": 15})).await;

        assert!(result.success);
        assert_eq!(result.tokens_used, 25);
        assert_eq!(leaf.account().consumed(), 25);
        assert_eq!(result.node_id, "M999");
    }

    #[tokio::test]
    async fn unknown_action_fails_and_charges_base() {
        let leaf = probe_leaf(100);
        let result = leaf.process(json!({"action": "bogus"})).await;

        assert!(!result.success);
        assert!(result.error_text().contains("bogus"));
        assert_eq!(result.error_kind, Some(ErrorKind::UnknownAction));
        assert_eq!(result.tokens_used, 10);
        assert_eq!(leaf.account().consumed(), 10);
    }

    #[tokio::test]
    async fn insufficient_tokens_leaves_account_unchanged() {
        let leaf = probe_leaf(9);
        let result = leaf.process(json!({"action": "echo", "value": 1})).await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::InsufficientTokens));
        assert_eq!(result.tokens_used, 0);
        assert_eq!(leaf.account().consumed(), 0);
    }

    #[tokio::test]
    async fn over_budget_result_charges_only_base() {
        let leaf = probe_leaf(30);
        let result = leaf.process(json!({"action": "costly", "extra": 50})).await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::InsufficientTokens));
        assert_eq!(result.tokens_used, 10);
        assert_eq!(leaf.account().consumed(), 10);
    }

    #[tokio::test]
    async fn panic_is_caught_at_the_boundary() {
        let leaf = probe_leaf(100);
        let result = leaf.process(json!({"action": "explode"})).await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::InternalFault));
        assert!(result.error_text().contains("probe exploded"));

        // Still usable afterwards
        let again = leaf.process(json!({"action": "echo", "value": "ok"})).await;
        assert!(again.success);
    }

    #[tokio::test]
    async fn not_found_is_a_failure() {
        let leaf = probe_leaf(100);
        let result = leaf.process(json!({"action": "missing"})).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::NotFound));
        assert!(result.error_text().contains("999"));
    }

    #[tokio::test]
    async fn connection_lifecycle() {
        let leaf = probe_leaf(100);
        assert_eq!(leaf.connection_state(), ConnectionState::Unconfigured);
        assert!(!leaf.is_connected());

        // Implicit connect on first request
        leaf.process(json!({"action": "echo", "value": 1})).await;
        assert_eq!(leaf.connection_state(), ConnectionState::Active);

        // Idempotent
        assert!(leaf.connect());
        assert!(leaf.connect());
        assert_eq!(leaf.connection_state(), ConnectionState::Active);

        leaf.disconnect();
        leaf.disconnect();
        assert_eq!(leaf.connection_state(), ConnectionState::Unconfigured);

        assert!(leaf.connect());
        assert_eq!(leaf.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn status_exposes_id_connection_and_tokens() {
        let leaf = probe_leaf(100);
        leaf.process(json!({"action": "echo", "value": 1})).await;

        let status = leaf.status();
        assert_eq!(status["node_id"], "M999");
        assert_eq!(status["connected"], true);
        assert_eq!(status["tokens_remaining"], 90);
        assert_eq!(status["interface"]["handled"], 1);
        assert_eq!(status["interface_type"], "probe");
    }

    #[test]
    fn set_allocation_starts_new_period() {
        let leaf = probe_leaf(100);
        leaf.set_allocation(500);
        assert_eq!(leaf.account().allocated(), 500);
        assert_eq!(leaf.account().consumed(), 0);
    }
}
