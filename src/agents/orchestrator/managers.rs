//! Level-1 managers, each owning one half of the tree.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::handlers::TenantSource;
use super::node::{merge_results, Coordinator, DispatchContext};
use crate::agents::{NodeError, NodeRequest};
use crate::config::DEFAULT_CONFIG_PATH;

fn default_config_path() -> String {
    DEFAULT_CONFIG_PATH.to_string()
}

fn default_true() -> bool {
    true
}

/// Log a line through the config handler, best effort.
async fn log(ctx: &DispatchContext<'_>, level: &str, message: &str) {
    let source = ctx.this().id().to_string();
    let logged = ctx
        .left(json!({
            "action": "log",
            "log_level": level,
            "message": message,
            "source_node": source,
        }))
        .await;
    if !logged.success {
        tracing::warn!(node = %source, error = logged.error_text(), "Could not write log entry");
    }
}

// ---------------------------------------------------------------------------
// M100
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum InfrastructureRequest {
    Initialize {
        #[serde(default = "default_config_path")]
        config_path: String,
    },
    GetTenantData {
        #[serde(default)]
        tenant_id: Option<u64>,
        #[serde(default)]
        source: TenantSource,
        #[serde(default)]
        include_config: bool,
    },
    SaveTenant {
        data: Map<String, Value>,
        #[serde(default = "default_true")]
        sync_sheet: bool,
    },
    ConfigUpdate {
        #[serde(default = "default_config_path")]
        config_path: String,
        data: Value,
    },
    SystemStatus,
    SyncData,
}

impl NodeRequest for InfrastructureRequest {
    const ACTIONS: &'static [&'static str] = &[
        "initialize",
        "get_tenant_data",
        "save_tenant",
        "config_update",
        "system_status",
        "sync_data",
    ];
}

/// Configuration, logging and tenant storage.
#[derive(Default)]
pub struct InfrastructureManager {
    initialized: AtomicBool,
}

impl InfrastructureManager {
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Coordinator for InfrastructureManager {
    type Request = InfrastructureRequest;
    const BASE_COST: u64 = 20;

    async fn coordinate(
        &self,
        request: InfrastructureRequest,
        ctx: &DispatchContext<'_>,
    ) -> Result<Value, NodeError> {
        match request {
            InfrastructureRequest::Initialize { config_path } => {
                let init = ctx
                    .left(json!({"action": "init_system", "config_path": config_path}))
                    .await
                    .into_value()
                    .map_err(|e| e.context("Configuration initialization failed"))?;

                let tenants = ctx
                    .right(json!({"action": "get_tenants", "source": TenantSource::Database.as_str()}))
                    .await;
                let tenant_count = tenants
                    .ok_data()
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);

                log(ctx, "INFO", "Infrastructure initialized").await;
                self.initialized.store(true, Ordering::Relaxed);

                Ok(json!({
                    "config": init["config"],
                    "database_connected": tenants.success,
                    "tenant_count": tenant_count,
                }))
            }
            InfrastructureRequest::GetTenantData {
                tenant_id,
                source,
                include_config,
            } => {
                let tenants = match tenant_id {
                    Some(id) => ctx
                        .right(json!({"action": "get_tenant", "id": id}))
                        .await
                        .into_value()
                        .map(|tenant| json!([tenant])),
                    None => ctx
                        .right(json!({"action": "get_tenants", "source": source.as_str()}))
                        .await
                        .into_value(),
                };

                let config = if include_config {
                    Some(ctx.left(json!({"action": "load_config"})).await)
                } else {
                    None
                };

                let tenants = tenants?;
                let mut data = json!({"tenants": tenants});
                if let Some(config) = config {
                    data["config"] = config.data_or(Value::Null);
                }
                Ok(data)
            }
            InfrastructureRequest::SaveTenant { data, sync_sheet } => {
                let saved = ctx
                    .right(json!({"action": "add_tenant", "data": data, "sync_sheet": sync_sheet}))
                    .await;

                if saved.success {
                    log(ctx, "INFO", "Tenant saved").await;
                } else {
                    let message = format!("Failed to save tenant: {}", saved.error_text());
                    log(ctx, "ERROR", &message).await;
                }
                saved.into_value()
            }
            InfrastructureRequest::ConfigUpdate { config_path, data } => ctx
                .left(json!({"action": "save_config", "config_path": config_path, "data": data}))
                .await
                .into_value(),
            InfrastructureRequest::SystemStatus => Ok(json!({
                "initialized": self.is_initialized(),
                "config_handler": ctx.left_node().status(),
                "data_handler": ctx.right_node().status(),
            })),
            InfrastructureRequest::SyncData => {
                let synced = ctx.right(json!({"action": "sync"})).await;
                let message = match synced.ok_data() {
                    Some(report) if report["in_sync"] == true => "Data sync: sources agree".to_string(),
                    Some(_) => "Data sync: sources differ".to_string(),
                    None => format!("Data sync failed: {}", synced.error_text()),
                };
                let level = if synced.success { "INFO" } else { "ERROR" };
                log(ctx, level, &message).await;
                synced.into_value()
            }
        }
    }

    fn describe(&self) -> Value {
        json!({"initialized": self.is_initialized()})
    }
}

// ---------------------------------------------------------------------------
// M200
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Api,
    Tool,
    Report,
}

fn default_get() -> String {
    "GET".to_string()
}

fn default_statement() -> String {
    "tenant_statement".to_string()
}

fn default_tenant_id() -> u64 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ApplicationRequest {
    /// Generic entry point dispatching on `request_type`
    ProcessRequest {
        request_type: RequestType,
        #[serde(default = "default_get")]
        method: String,
        #[serde(default)]
        url: String,
        #[serde(default)]
        tool: String,
        #[serde(default)]
        params: Map<String, Value>,
        #[serde(default = "default_statement")]
        report_type: String,
        #[serde(default)]
        data: Value,
    },
    GenerateReport {
        #[serde(default = "default_statement")]
        report_type: String,
        #[serde(default)]
        data: Map<String, Value>,
        #[serde(default)]
        analyze: bool,
    },
    ExecuteTool {
        tool: String,
        #[serde(default)]
        params: Map<String, Value>,
        /// Prompt resource to render and pass to the tool
        #[serde(default)]
        use_prompt: Option<String>,
        #[serde(default)]
        prompt_variables: Map<String, Value>,
    },
    FullPipeline {
        #[serde(default = "default_tenant_id")]
        tenant_id: u64,
        #[serde(default = "default_statement")]
        report_type: String,
    },
    Capabilities,
    Status,
}

impl NodeRequest for ApplicationRequest {
    const ACTIONS: &'static [&'static str] = &[
        "process_request",
        "generate_report",
        "execute_tool",
        "full_pipeline",
        "capabilities",
        "status",
    ];
}

/// Tools, resources and outputs.
#[derive(Default)]
pub struct ApplicationManager;

fn pdf_request(report_type: &str, data: Value) -> Value {
    json!({"action": "generate_pdf", "report_type": report_type, "data": data})
}

#[async_trait]
impl Coordinator for ApplicationManager {
    type Request = ApplicationRequest;
    const BASE_COST: u64 = 25;

    async fn coordinate(
        &self,
        request: ApplicationRequest,
        ctx: &DispatchContext<'_>,
    ) -> Result<Value, NodeError> {
        match request {
            ApplicationRequest::ProcessRequest {
                request_type,
                method,
                url,
                tool,
                params,
                report_type,
                data,
            } => {
                let result = match request_type {
                    RequestType::Api => {
                        let data = if data.is_null() { json!({}) } else { data };
                        ctx.right(json!({
                            "action": "api_request",
                            "method": method,
                            "url": url,
                            "data": data,
                        }))
                        .await
                    }
                    RequestType::Tool => {
                        ctx.left(json!({"action": "call_tool", "tool": tool, "params": params}))
                            .await
                    }
                    RequestType::Report => ctx.right(pdf_request(&report_type, data)).await,
                };
                result.into_value()
            }
            ApplicationRequest::GenerateReport {
                report_type,
                mut data,
                analyze,
            } => {
                let mut analysis_included = false;
                if analyze {
                    let tool = if report_type == "payment_history" {
                        "analyze_payments"
                    } else {
                        "calculate_balance"
                    };
                    let tenant_id = data.get("id").cloned().unwrap_or(json!(1));
                    let analysis = ctx
                        .left(json!({
                            "action": "call_tool",
                            "tool": tool,
                            "params": {"tenant_id": tenant_id},
                        }))
                        .await;
                    if let Some(output) = analysis.ok_data() {
                        data.insert("analysis".into(), output["output"].clone());
                        analysis_included = true;
                    }
                }

                let report = ctx
                    .right(pdf_request(&report_type, Value::Object(data)))
                    .await
                    .into_value()?;
                Ok(json!({"report": report, "analysis_included": analysis_included}))
            }
            ApplicationRequest::ExecuteTool {
                tool,
                params,
                use_prompt,
                prompt_variables,
            } => {
                let request = match use_prompt {
                    Some(prompt) => json!({
                        "action": "execute_with_prompt",
                        "tool": tool,
                        "params": params,
                        "prompt": prompt,
                        "prompt_variables": prompt_variables,
                    }),
                    None => json!({"action": "call_tool", "tool": tool, "params": params}),
                };
                ctx.left(request).await.into_value()
            }
            ApplicationRequest::FullPipeline {
                tenant_id,
                report_type,
            } => {
                let mut steps = Vec::new();

                let mut tenant = ctx
                    .right(json!({
                        "action": "api_request",
                        "method": "GET",
                        "url": format!("/api/tenants/{}", tenant_id),
                    }))
                    .await
                    .into_value()
                    .map_err(|e| e.context("API fetch failed"))?;
                steps.push("api_fetch");

                let info = ctx
                    .left(json!({
                        "action": "call_tool",
                        "tool": "get_tenant_info",
                        "params": {"tenant_id": tenant_id},
                    }))
                    .await;
                if let Some(info) = info.ok_data() {
                    tenant["tool_info"] = info["output"].clone();
                    steps.push("tool_process");
                }

                let report = ctx
                    .right(pdf_request(&report_type, tenant.clone()))
                    .await
                    .into_value()?;
                steps.push("pdf_generate");

                Ok(json!({"tenant": tenant, "report": report, "pipeline_steps": steps}))
            }
            ApplicationRequest::Capabilities => {
                let (server, outputs) = ctx
                    .both(
                        json!({"action": "list_capabilities"}),
                        json!({"action": "list_outputs"}),
                    )
                    .await;
                let merged = merge_results(server, outputs)?;
                Ok(json!({"server": merged["left"], "outputs": merged["right"]}))
            }
            ApplicationRequest::Status => Ok(json!({
                "application_running": true,
                "server_handler": ctx.left_node().status(),
                "output_handler": ctx.right_node().status(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::agents::{build_tree, find_by_id, ErrorKind, Node, NodeResult};
    use crate::config::Config;

    async fn send(node_id: &str, request: serde_json::Value) -> NodeResult {
        let root = build_tree(&Config::default()).unwrap();
        let node = find_by_id(&root, node_id).unwrap();
        node.process(request).await
    }

    #[tokio::test]
    async fn infrastructure_initializes_from_both_handlers() {
        let root = build_tree(&Config::default()).unwrap();
        let manager = find_by_id(&root, "M100").unwrap();

        let result = manager.process(json!({"action": "initialize"})).await;
        assert!(result.success, "{:?}", result.error);
        let data = result.data.unwrap();
        assert_eq!(data["tenant_count"], 3);
        assert_eq!(data["database_connected"], true);
        assert_eq!(data["config"]["database"]["port"], 5432);

        let status = manager.process(json!({"action": "system_status"})).await;
        assert_eq!(status.data.unwrap()["initialized"], true);
    }

    #[tokio::test]
    async fn missing_tenant_keeps_the_leaf_error_text() {
        let result = send("M100", json!({"action": "get_tenant_data", "tenant_id": 999})).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::ChildFailure));
        assert_eq!(result.error_text(), "Not found: tenant 999");
    }

    #[tokio::test]
    async fn tenant_data_can_include_config() {
        let result = send(
            "M100",
            json!({"action": "get_tenant_data", "tenant_id": 2, "include_config": true}),
        )
        .await;
        let data = result.data.unwrap();
        assert_eq!(data["tenants"][0]["name"], "Jane Smith");
        assert_eq!(data["config"]["logging"]["level"], "INFO");
    }

    #[tokio::test]
    async fn seeded_sources_are_in_sync() {
        let result = send("M100", json!({"action": "sync_data"})).await;
        let data = result.data.unwrap();
        assert_eq!(data["in_sync"], true);
        assert_eq!(data["database_count"], 3);
    }

    #[tokio::test]
    async fn report_with_analysis() {
        let result = send(
            "M200",
            json!({
                "action": "generate_report",
                "report_type": "balance_summary",
                "data": {"id": 1, "name": "John Doe"},
                "analyze": true,
            }),
        )
        .await;
        assert!(result.success, "{:?}", result.error);
        let data = result.data.unwrap();
        assert_eq!(data["analysis_included"], true);
        assert_eq!(data["report"]["created"], true);
    }

    #[tokio::test]
    async fn pipeline_runs_all_steps() {
        let result = send("M200", json!({"action": "full_pipeline", "tenant_id": 1})).await;
        assert!(result.success, "{:?}", result.error);
        let data = result.data.unwrap();
        assert_eq!(
            data["pipeline_steps"],
            json!(["api_fetch", "tool_process", "pdf_generate"])
        );
        assert_eq!(data["tenant"]["name"], "John Doe");
    }

    #[tokio::test]
    async fn pipeline_for_unknown_tenant_names_the_fetch() {
        let result = send("M200", json!({"action": "full_pipeline", "tenant_id": 42})).await;
        assert!(!result.success);
        assert!(result.error_text().starts_with("API fetch failed: "));
        assert!(result.error_text().contains("42"));
    }

    #[tokio::test]
    async fn process_request_dispatches_on_type() {
        let result = send(
            "M200",
            json!({"action": "process_request", "request_type": "tool", "tool": "get_tenant_info", "params": {"tenant_id": 1}}),
        )
        .await;
        assert!(result.success, "{:?}", result.error);

        let result = send(
            "M200",
            json!({"action": "process_request", "request_type": "email"}),
        )
        .await;
        assert_eq!(result.error_kind, Some(ErrorKind::InvalidRequest));
    }

    #[tokio::test]
    async fn capabilities_merge_both_handlers() {
        let result = send("M200", json!({"action": "capabilities"})).await;
        let data = result.data.unwrap();
        assert!(data["server"].is_object());
        assert_eq!(data["outputs"]["api_endpoints"].as_array().unwrap().len(), 4);
    }
}
