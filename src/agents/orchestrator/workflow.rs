//! Named multi-step workflows run by the root, and their history.
//!
//! Workflows are best effort: every step runs even if an earlier one
//! failed, and the run succeeds only if all steps did.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};

use super::node::DispatchContext;
use crate::agents::{NodeError, NodeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    /// Config + tenant record -> tool processing -> tenant statement
    TenantReport,
    /// Config -> payment analysis -> payment history report
    FullPipeline,
    /// Spreadsheet/database reconciliation
    DataSync,
}

impl WorkflowKind {
    pub const ALL: [Self; 3] = [Self::TenantReport, Self::FullPipeline, Self::DataSync];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TenantReport => "tenant_report",
            Self::FullPipeline => "full_pipeline",
            Self::DataSync => "data_sync",
        }
    }

    /// Tokens the root charges on top of its base cost.
    pub fn overhead(&self) -> u64 {
        match self {
            Self::TenantReport => 20,
            Self::FullPipeline => 70,
            Self::DataSync => 0,
        }
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowKind {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| NodeError::InvalidRequest(format!("unknown workflow type: {}", s)))
    }
}

/// Outcome of one workflow step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub step: &'static str,
    pub node_id: String,
    pub success: bool,
    pub tokens_used: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One completed workflow run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowRecord {
    pub id: String,
    pub kind: WorkflowKind,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub tokens_used: u64,
}

/// Append-only log of workflow runs. Ids are sequential: `WF-0001`, `WF-0002`, ...
#[derive(Debug, Default)]
pub struct WorkflowHistory {
    records: Vec<WorkflowRecord>,
}

impl WorkflowHistory {
    pub fn append(&mut self, kind: WorkflowKind, success: bool, tokens_used: u64) -> WorkflowRecord {
        let record = WorkflowRecord {
            id: format!("WF-{:04}", self.records.len() + 1),
            kind,
            timestamp: Utc::now(),
            success,
            tokens_used,
        };
        self.records.push(record.clone());
        record
    }

    pub fn records(&self) -> &[WorkflowRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Steps and collected payloads of a run in progress.
#[derive(Debug)]
pub struct WorkflowRun {
    pub kind: WorkflowKind,
    pub steps: Vec<StepOutcome>,
    pub outputs: Map<String, Value>,
}

impl WorkflowRun {
    fn new(kind: WorkflowKind) -> Self {
        Self {
            kind,
            steps: Vec::new(),
            outputs: Map::new(),
        }
    }

    /// Record a step; returns its payload if it succeeded.
    fn step(&mut self, step: &'static str, result: NodeResult) -> Option<Value> {
        tracing::debug!(
            workflow = %self.kind,
            step,
            success = result.success,
            tokens = result.tokens_used,
            "Workflow step finished"
        );

        self.steps.push(StepOutcome {
            step,
            node_id: result.node_id.to_string(),
            success: result.success,
            tokens_used: result.tokens_used,
            error: result.error.clone(),
        });

        let data = result.ok_data().cloned();
        self.outputs
            .insert(step.to_string(), data.clone().unwrap_or(Value::Null));
        data
    }

    pub fn success(&self) -> bool {
        self.steps.iter().all(|s| s.success)
    }

    pub fn failed_steps(&self) -> Vec<&'static str> {
        self.steps
            .iter()
            .filter(|s| !s.success)
            .map(|s| s.step)
            .collect()
    }
}

/// Execute a workflow through the root's children.
///
/// The left child is the infrastructure manager, the right child the
/// application manager.
pub async fn run_workflow(
    kind: WorkflowKind,
    data: Map<String, Value>,
    ctx: &DispatchContext<'_>,
) -> WorkflowRun {
    let mut run = WorkflowRun::new(kind);

    match kind {
        WorkflowKind::TenantReport => {
            let mut tenant = data;
            let mut lookup = json!({"action": "get_tenant_data", "include_config": true});
            if let Some(id) = tenant.get("tenant_id").and_then(Value::as_u64) {
                lookup["tenant_id"] = json!(id);
            }

            let loaded = run.step("config_load", ctx.left(lookup).await);
            if let Some(Value::Object(record)) =
                loaded.as_ref().and_then(|d| d["tenants"].get(0)).cloned()
            {
                tenant.extend(record);
            }

            let tenant_id = tenant.get("id").cloned().unwrap_or(json!(1));
            let processed = run.step(
                "tool_process",
                ctx.right(json!({
                    "action": "execute_tool",
                    "tool": "get_tenant_info",
                    "params": {"tenant_id": tenant_id},
                }))
                .await,
            );
            if let Some(processed) = processed {
                tenant.insert("processed".into(), processed);
            }

            run.step(
                "report_generate",
                ctx.right(json!({
                    "action": "generate_report",
                    "report_type": "tenant_statement",
                    "data": tenant,
                }))
                .await,
            );
        }
        WorkflowKind::FullPipeline => {
            let tenant_id = data.get("tenant_id").cloned().unwrap_or(json!(1));

            run.step(
                "config_load",
                ctx.left(json!({"action": "get_tenant_data", "include_config": true}))
                    .await,
            );
            run.step(
                "tool_process",
                ctx.right(json!({
                    "action": "execute_tool",
                    "tool": "analyze_payments",
                    "params": {"tenant_id": tenant_id, "period": "monthly"},
                }))
                .await,
            );
            run.step(
                "pdf_generate",
                ctx.right(json!({
                    "action": "generate_report",
                    "report_type": "payment_history",
                    "data": {
                        "payments": [{"amount": 1500, "date": "2024-01-01", "method": "check"}],
                    },
                }))
                .await,
            );
        }
        WorkflowKind::DataSync => {
            run.step("sync", ctx.left(json!({"action": "sync_data"})).await);
        }
    }

    run
}
