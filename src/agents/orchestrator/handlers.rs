//! Level-2 handlers, each coordinating a pair of leaves.
//!
//! - `ConfigHandler` (M110): config store + log writer
//! - `DataHandler` (M120): spreadsheet store + tenant database
//! - `ServerHandler` (M210): tool server + resource library
//! - `OutputHandler` (M220): web gateway + report generator

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::node::{Coordinator, DispatchContext};
use crate::agents::leaf::{TENANT_WORKBOOK, WEB_ENDPOINTS};
use crate::agents::{NodeError, NodeRequest};
use crate::config::DEFAULT_CONFIG_PATH;

fn default_config_path() -> String {
    DEFAULT_CONFIG_PATH.to_string()
}

fn default_level() -> String {
    "INFO".to_string()
}

fn default_true() -> bool {
    true
}

fn log_request(level: &str, message: &str, source: &str) -> Value {
    json!({
        "action": "log",
        "level": level,
        "message": message,
        "node_id": source,
    })
}

// ---------------------------------------------------------------------------
// M110
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ConfigHandlerRequest {
    LoadConfig {
        #[serde(default = "default_config_path")]
        config_path: String,
    },
    SaveConfig {
        #[serde(default = "default_config_path")]
        config_path: String,
        data: Value,
    },
    Log {
        #[serde(default = "default_level")]
        log_level: String,
        message: String,
        #[serde(default)]
        source_node: Option<String>,
    },
    InitSystem {
        #[serde(default = "default_config_path")]
        config_path: String,
    },
}

impl NodeRequest for ConfigHandlerRequest {
    const ACTIONS: &'static [&'static str] = &["load_config", "save_config", "log", "init_system"];
}

/// Configuration access with every operation logged.
pub struct ConfigHandler;

#[async_trait]
impl Coordinator for ConfigHandler {
    type Request = ConfigHandlerRequest;
    const BASE_COST: u64 = 5;

    async fn coordinate(
        &self,
        request: ConfigHandlerRequest,
        ctx: &DispatchContext<'_>,
    ) -> Result<Value, NodeError> {
        let id = ctx.this().id().to_string();

        match request {
            ConfigHandlerRequest::LoadConfig { config_path } => {
                let config = ctx
                    .left(json!({"action": "read", "path": config_path}))
                    .await
                    .into_value()?;
                ctx.right(log_request(
                    "INFO",
                    &format!("Loaded configuration from {}", config_path),
                    &id,
                ))
                .await;
                Ok(config)
            }
            ConfigHandlerRequest::SaveConfig { config_path, data } => {
                let written = ctx
                    .left(json!({"action": "write", "path": config_path, "data": data}))
                    .await
                    .into_value()?;
                ctx.right(log_request(
                    "INFO",
                    &format!("Saved configuration to {}", config_path),
                    &id,
                ))
                .await;
                Ok(written)
            }
            ConfigHandlerRequest::Log {
                log_level,
                message,
                source_node,
            } => ctx
                .right(log_request(
                    &log_level,
                    &message,
                    source_node.as_deref().unwrap_or(&id),
                ))
                .await
                .into_value(),
            ConfigHandlerRequest::InitSystem { config_path } => {
                ctx.right(log_request("INFO", "Starting system initialization", &id))
                    .await;

                let read = ctx
                    .left(json!({"action": "read", "path": config_path}))
                    .await;
                if read.success {
                    ctx.right(log_request("INFO", "Configuration loaded successfully", &id))
                        .await;
                } else {
                    ctx.right(log_request(
                        "ERROR",
                        &format!("Failed to load configuration: {}", read.error_text()),
                        &id,
                    ))
                    .await;
                }

                let config = read.into_value()?;
                Ok(json!({"config": config, "initialized": true}))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// M120
// ---------------------------------------------------------------------------

/// Where tenant records are read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantSource {
    #[serde(alias = "excel")]
    Sheet,
    #[default]
    Database,
    Both,
}

impl TenantSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sheet => "sheet",
            Self::Database => "database",
            Self::Both => "both",
        }
    }
}

fn default_workbook() -> String {
    TENANT_WORKBOOK.to_string()
}

fn default_export_path() -> String {
    "export.xlsx".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DataHandlerRequest {
    GetTenants {
        #[serde(default)]
        source: TenantSource,
    },
    GetTenant {
        id: u64,
    },
    AddTenant {
        data: Map<String, Value>,
        #[serde(default = "default_true")]
        sync_sheet: bool,
    },
    ImportSheet {
        #[serde(default = "default_workbook")]
        path: String,
    },
    ExportSheet {
        #[serde(default = "default_export_path")]
        path: String,
    },
    Sync,
}

impl NodeRequest for DataHandlerRequest {
    const ACTIONS: &'static [&'static str] = &[
        "get_tenants",
        "get_tenant",
        "add_tenant",
        "import_sheet",
        "export_sheet",
        "sync",
    ];
}

fn sheet_rows(path: &str) -> Value {
    json!({"action": "get_sheet", "path": path})
}

fn ids(rows: &Value) -> BTreeSet<u64> {
    rows.as_array()
        .map(|rows| {
            rows.iter()
                .filter_map(|r| r.get("id").and_then(Value::as_u64))
                .collect()
        })
        .unwrap_or_default()
}

/// Tenant data spread over a spreadsheet and a database.
pub struct DataHandler;

#[async_trait]
impl Coordinator for DataHandler {
    type Request = DataHandlerRequest;
    const BASE_COST: u64 = 10;

    async fn coordinate(
        &self,
        request: DataHandlerRequest,
        ctx: &DispatchContext<'_>,
    ) -> Result<Value, NodeError> {
        match request {
            DataHandlerRequest::GetTenants { source } => match source {
                TenantSource::Sheet => ctx.left(sheet_rows(TENANT_WORKBOOK)).await.into_value(),
                TenantSource::Database => {
                    ctx.right(json!({"action": "get_tenants"})).await.into_value()
                }
                TenantSource::Both => {
                    ctx.merge(sheet_rows(TENANT_WORKBOOK), json!({"action": "get_tenants"}))
                        .await
                }
            },
            DataHandlerRequest::GetTenant { id } => ctx
                .right(json!({"action": "get_tenant", "id": id}))
                .await
                .into_value(),
            DataHandlerRequest::AddTenant { data, sync_sheet } => {
                let inserted = ctx
                    .right(json!({"action": "add_tenant", "data": data}))
                    .await
                    .into_value()?;

                let mut synced = false;
                if sync_sheet {
                    let mut row = data;
                    row.insert("id".into(), inserted["id"].clone());
                    let added = ctx
                        .left(json!({"action": "add_row", "path": TENANT_WORKBOOK, "data": row}))
                        .await;
                    if !added.success {
                        tracing::warn!(error = added.error_text(), "Sheet sync failed");
                    }
                    synced = added.success;
                }

                Ok(json!({"id": inserted["id"], "database": inserted, "sheet_synced": synced}))
            }
            DataHandlerRequest::ImportSheet { path } => {
                let rows = ctx.left(sheet_rows(&path)).await.into_value()?;
                let rows = rows.as_array().cloned().unwrap_or_default();

                let mut imported = 0;
                for row in rows {
                    let result = ctx.right(json!({"action": "add_tenant", "data": row})).await;
                    if result.success {
                        imported += 1;
                    }
                }

                Ok(json!({"imported": imported, "source": path}))
            }
            DataHandlerRequest::ExportSheet { path } => {
                let rows = ctx
                    .right(json!({"action": "get_tenants"}))
                    .await
                    .into_value()?;
                let count = rows.as_array().map_or(0, Vec::len);
                let written = ctx
                    .left(json!({"action": "write", "path": path, "data": {"Sheet1": rows}}))
                    .await
                    .into_value()?;

                Ok(json!({"exported": count, "file": written}))
            }
            DataHandlerRequest::Sync => {
                let (sheet, database) = ctx
                    .both(sheet_rows(TENANT_WORKBOOK), json!({"action": "get_tenants"}))
                    .await;
                let sheet = ids(&sheet.into_value()?);
                let database = ids(&database.into_value()?);

                let only_in_sheet: Vec<u64> = sheet.difference(&database).copied().collect();
                let only_in_database: Vec<u64> = database.difference(&sheet).copied().collect();

                Ok(json!({
                    "sheet_count": sheet.len(),
                    "database_count": database.len(),
                    "in_sync": only_in_sheet.is_empty() && only_in_database.is_empty(),
                    "only_in_sheet": only_in_sheet,
                    "only_in_database": only_in_database,
                }))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// M210
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ServerHandlerRequest {
    CallTool {
        tool: String,
        #[serde(default)]
        params: Map<String, Value>,
    },
    GetResource {
        resource: String,
        #[serde(default)]
        variables: Option<Map<String, Value>>,
    },
    ExecuteWithPrompt {
        tool: String,
        #[serde(default)]
        params: Map<String, Value>,
        prompt: String,
        #[serde(default)]
        prompt_variables: Map<String, Value>,
    },
    ListCapabilities,
    Status,
}

impl NodeRequest for ServerHandlerRequest {
    const ACTIONS: &'static [&'static str] = &[
        "call_tool",
        "get_resource",
        "execute_with_prompt",
        "list_capabilities",
        "status",
    ];
}

/// Rename the `left`/`right` keys of a merged payload.
fn relabel(mut merged: Value, left: &str, right: &str) -> Value {
    let mut out = Map::new();
    out.insert(left.to_string(), merged["left"].take());
    out.insert(right.to_string(), merged["right"].take());
    Value::Object(out)
}

/// Tool calls, optionally driven by a rendered prompt.
pub struct ServerHandler;

#[async_trait]
impl Coordinator for ServerHandler {
    type Request = ServerHandlerRequest;
    const BASE_COST: u64 = 15;

    async fn coordinate(
        &self,
        request: ServerHandlerRequest,
        ctx: &DispatchContext<'_>,
    ) -> Result<Value, NodeError> {
        match request {
            ServerHandlerRequest::CallTool { tool, params } => ctx
                .left(json!({"action": "call", "tool": tool, "params": params}))
                .await
                .into_value(),
            ServerHandlerRequest::GetResource {
                resource,
                variables,
            } => {
                let request = match variables {
                    Some(variables) if !variables.is_empty() => {
                        json!({"action": "render", "uri": resource, "variables": variables})
                    }
                    _ => json!({"action": "fetch", "uri": resource}),
                };
                ctx.right(request).await.into_value()
            }
            ServerHandlerRequest::ExecuteWithPrompt {
                tool,
                mut params,
                prompt,
                prompt_variables,
            } => {
                let rendered = ctx
                    .right(json!({"action": "render", "uri": prompt, "variables": prompt_variables}))
                    .await
                    .into_value()
                    .map_err(|e| e.context("Failed to get prompt"))?;
                let text = rendered["content"]["rendered"].clone();

                params.insert("prompt_context".into(), text.clone());
                let tool_result = ctx
                    .left(json!({"action": "call", "tool": tool, "params": params}))
                    .await
                    .into_value()?;

                Ok(json!({"prompt": text, "tool_result": tool_result}))
            }
            ServerHandlerRequest::ListCapabilities => {
                let merged = ctx
                    .merge(json!({"action": "list"}), json!({"action": "list"}))
                    .await?;
                Ok(relabel(merged, "tools", "resources"))
            }
            ServerHandlerRequest::Status => {
                let merged = ctx
                    .merge(json!({"action": "status"}), json!({"action": "status"}))
                    .await?;
                Ok(relabel(merged, "tools", "resources"))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// M220
// ---------------------------------------------------------------------------

fn default_method() -> String {
    "GET".to_string()
}

fn default_general() -> String {
    "general".to_string()
}

fn default_fetch_url() -> String {
    "/api/tenants".to_string()
}

fn default_balance_summary() -> String {
    "balance_summary".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OutputHandlerRequest {
    ApiRequest {
        #[serde(default = "default_method")]
        method: String,
        url: String,
        #[serde(default)]
        data: Map<String, Value>,
    },
    GeneratePdf {
        #[serde(default = "default_general")]
        report_type: String,
        #[serde(default)]
        data: Value,
        #[serde(default)]
        output_path: Option<String>,
    },
    FetchAndReport {
        #[serde(default = "default_fetch_url")]
        url: String,
        #[serde(default = "default_balance_summary")]
        report_type: String,
        #[serde(default)]
        output_path: Option<String>,
    },
    MultiOutput {
        #[serde(default = "default_general")]
        report_type: String,
        #[serde(default)]
        data: Value,
    },
    ListOutputs,
}

impl NodeRequest for OutputHandlerRequest {
    const ACTIONS: &'static [&'static str] = &[
        "api_request",
        "generate_pdf",
        "fetch_and_report",
        "multi_output",
        "list_outputs",
    ];
}

fn generate_request(report_type: &str, data: Value, output_path: Option<String>) -> Value {
    let mut request = json!({"action": "generate", "report_type": report_type, "data": data});
    if let Some(path) = output_path {
        request["output_path"] = json!(path);
    }
    request
}

/// Web and document outputs.
pub struct OutputHandler;

#[async_trait]
impl Coordinator for OutputHandler {
    type Request = OutputHandlerRequest;
    const BASE_COST: u64 = 10;

    async fn coordinate(
        &self,
        request: OutputHandlerRequest,
        ctx: &DispatchContext<'_>,
    ) -> Result<Value, NodeError> {
        match request {
            OutputHandlerRequest::ApiRequest { method, url, data } => ctx
                .left(json!({"action": method.to_lowercase(), "url": url, "data": data}))
                .await
                .into_value(),
            OutputHandlerRequest::GeneratePdf {
                report_type,
                data,
                output_path,
            } => ctx
                .right(generate_request(&report_type, data, output_path))
                .await
                .into_value(),
            OutputHandlerRequest::FetchAndReport {
                url,
                report_type,
                output_path,
            } => {
                let api_data = ctx
                    .left(json!({"action": "get", "url": url}))
                    .await
                    .into_value()
                    .map_err(|e| e.context("API fetch failed"))?;

                let report_data = match &api_data {
                    Value::Array(_) if report_type == "payment_history" => {
                        json!({"payments": api_data})
                    }
                    Value::Array(_) => json!({"tenants": api_data}),
                    _ => api_data.clone(),
                };

                let pdf_info = ctx
                    .right(generate_request(&report_type, report_data, output_path))
                    .await
                    .into_value()?;

                Ok(json!({"api_data": api_data, "pdf_info": pdf_info}))
            }
            OutputHandlerRequest::MultiOutput { report_type, data } => {
                let notify = json!({
                    "action": "post",
                    "url": "/api/reports",
                    "data": {"type": report_type, "status": "generating"},
                });
                let merged = ctx
                    .merge(notify, generate_request(&report_type, data, None))
                    .await?;
                Ok(relabel(merged, "api", "pdf"))
            }
            OutputHandlerRequest::ListOutputs => {
                let listed = ctx.right(json!({"action": "list"})).await.into_value()?;
                Ok(json!({
                    "pdf_documents": listed["documents"],
                    "api_endpoints": WEB_ENDPOINTS,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::leaf::{
        ConfigStore, LeafNode, LogWriter, ReportGenerator, ResourceLibrary, SheetStore,
        TenantDatabase, ToolServer, WebGateway,
    };
    use crate::agents::orchestrator::InternalNode;
    use crate::agents::{ErrorKind, Node, NodeConfig, NodeLevel, NodeRole};

    fn handler<C: Coordinator, L, R>(id: &str, coordinator: C) -> InternalNode<C>
    where
        L: crate::agents::leaf::LeafInterface,
        R: crate::agents::leaf::LeafInterface,
    {
        let left_id = format!("{}1", id.trim_end_matches('0'));
        let right_id = format!("{}2", id.trim_end_matches('0'));
        let config = NodeConfig::internal(
            id,
            "Handler",
            NodeLevel::Handler,
            NodeRole::Handler,
            None,
            (left_id.as_str(), right_id.as_str()),
            10_000,
        );
        InternalNode::new(
            config,
            coordinator,
            Box::new(LeafNode::<L>::new(NodeConfig::leaf(&left_id, "Left", id, 10_000))),
            Box::new(LeafNode::<R>::new(NodeConfig::leaf(&right_id, "Right", id, 10_000))),
        )
    }

    #[tokio::test]
    async fn config_handler_logs_loads() {
        let node = handler::<_, ConfigStore, LogWriter>("M110", ConfigHandler);
        let result = node.process(json!({"action": "load_config"})).await;
        assert!(result.success);
        assert_eq!(result.data.unwrap()["database"]["port"], 5432);

        let log = node.right().process(json!({"action": "read"})).await;
        let entries = log.data.unwrap()["entries"].as_array().unwrap().len();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn init_system_reports_initialized() {
        let node = handler::<_, ConfigStore, LogWriter>("M110", ConfigHandler);
        let result = node.process(json!({"action": "init_system"})).await;
        let data = result.data.unwrap();
        assert_eq!(data["initialized"], true);
        assert!(data["config"]["api"].is_object());
    }

    #[tokio::test]
    async fn data_handler_sources() {
        let node = handler::<_, SheetStore, TenantDatabase>("M120", DataHandler);

        for source in ["sheet", "excel", "database"] {
            let result = node
                .process(json!({"action": "get_tenants", "source": source}))
                .await;
            assert_eq!(result.data.unwrap().as_array().unwrap().len(), 3, "{source}");
        }

        let both = node
            .process(json!({"action": "get_tenants", "source": "both"}))
            .await;
        let data = both.data.unwrap();
        assert!(data["left"].is_array());
        assert!(data["right"].is_array());
    }

    #[tokio::test]
    async fn data_handler_sync_detects_drift() {
        let node = handler::<_, SheetStore, TenantDatabase>("M120", DataHandler);
        let synced = node.process(json!({"action": "sync"})).await;
        assert_eq!(synced.data.unwrap()["in_sync"], true);

        node.process(json!({
            "action": "add_tenant",
            "data": {"name": "Ann Lee", "unit": "305", "rent": 1200},
            "sync_sheet": false,
        }))
        .await;

        let drift = node.process(json!({"action": "sync"})).await.data.unwrap();
        assert_eq!(drift["in_sync"], false);
        assert_eq!(drift["only_in_database"], json!([4]));
    }

    #[tokio::test]
    async fn missing_tenant_propagates_not_found_text() {
        let node = handler::<_, SheetStore, TenantDatabase>("M120", DataHandler);
        let result = node.process(json!({"action": "get_tenant", "id": 999})).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::ChildFailure));
        assert!(result.error_text().contains("999"));
    }

    #[tokio::test]
    async fn execute_with_prompt_passes_context_to_tool() {
        let node = handler::<_, ToolServer, ResourceLibrary>("M210", ServerHandler);
        let result = node
            .process(json!({
                "action": "execute_with_prompt",
                "tool": "send_notification",
                "params": {"tenant_id": 1},
                "prompt": "prompt://payment-reminder",
                "prompt_variables": {"tenant_name": "John", "amount": 1500, "due_date": "Feb 1"},
            }))
            .await;

        let data = result.data.unwrap();
        assert_eq!(data["prompt"], "Dear John, your rent of $1500 is due on Feb 1.");
        assert_eq!(data["tool_result"]["input"]["prompt_context"], data["prompt"]);
    }

    #[tokio::test]
    async fn missing_prompt_is_wrapped() {
        let node = handler::<_, ToolServer, ResourceLibrary>("M210", ServerHandler);
        let result = node
            .process(json!({"action": "execute_with_prompt", "tool": "x", "prompt": "prompt://nope"}))
            .await;
        assert!(result.error_text().starts_with("Failed to get prompt: "));
    }

    #[tokio::test]
    async fn server_capabilities_merge_both_leaves() {
        let node = handler::<_, ToolServer, ResourceLibrary>("M210", ServerHandler);
        let result = node.process(json!({"action": "list_capabilities"})).await;
        let data = result.data.unwrap();
        assert_eq!(data["tools"].as_array().unwrap().len(), 5);
        assert_eq!(data["resources"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn output_handler_fetch_and_report() {
        let node = handler::<_, WebGateway, ReportGenerator>("M220", OutputHandler);
        let result = node
            .process(json!({"action": "fetch_and_report", "output_path": "reports/summary.pdf"}))
            .await;
        let data = result.data.unwrap();
        assert_eq!(data["api_data"].as_array().unwrap().len(), 2);
        assert_eq!(data["pdf_info"]["path"], "reports/summary.pdf");

        let outputs = node.process(json!({"action": "list_outputs"})).await.data.unwrap();
        assert_eq!(outputs["pdf_documents"], json!(["reports/summary.pdf"]));
        assert_eq!(outputs["api_endpoints"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn api_request_maps_method_to_action() {
        let node = handler::<_, WebGateway, ReportGenerator>("M220", OutputHandler);
        let ok = node
            .process(json!({"action": "api_request", "method": "GET", "url": "/api/tenants/1"}))
            .await;
        assert_eq!(ok.data.unwrap()["name"], "John Doe");

        let bad = node
            .process(json!({"action": "api_request", "method": "PATCH", "url": "/api/tenants/1"}))
            .await;
        assert!(bad.error_text().contains("patch"));
    }

    #[tokio::test]
    async fn multi_output_tolerates_one_failure() {
        let node = handler::<_, WebGateway, ReportGenerator>("M220", OutputHandler);
        let result = node
            .process(json!({"action": "multi_output", "report_type": "balance_summary"}))
            .await;
        let data = result.data.unwrap();
        assert_eq!(data["api"]["status"], "accepted");
        assert!(data["pdf"]["path"].is_string());
    }
}
