//! M211 - Tool server.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{size_cost, LeafInterface, LeafOutput};
use crate::agents::{NodeError, NodeRequest};
use crate::util::payload_size;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Query,
    Analysis,
    Mutation,
}

struct Tool {
    name: &'static str,
    description: &'static str,
    kind: ToolKind,
    parameters: &'static [(&'static str, &'static str)],
}

const TOOLS: &[Tool] = &[
    Tool {
        name: "get_tenant_info",
        description: "Get information about a tenant",
        kind: ToolKind::Query,
        parameters: &[("tenant_id", "int")],
    },
    Tool {
        name: "calculate_balance",
        description: "Calculate tenant balance including fees",
        kind: ToolKind::Analysis,
        parameters: &[("tenant_id", "int"), ("include_fees", "bool")],
    },
    Tool {
        name: "send_notification",
        description: "Send notification to tenant",
        kind: ToolKind::Mutation,
        parameters: &[("tenant_id", "int"), ("message", "str"), ("type", "str")],
    },
    Tool {
        name: "generate_report",
        description: "Generate tenant report",
        kind: ToolKind::Analysis,
        parameters: &[("report_type", "str"), ("date_range", "str")],
    },
    Tool {
        name: "analyze_payments",
        description: "Analyze payment patterns",
        kind: ToolKind::Analysis,
        parameters: &[("tenant_id", "int"), ("period", "str")],
    },
];

impl Tool {
    fn to_json(&self) -> Value {
        let parameters: Map<String, Value> = self
            .parameters
            .iter()
            .map(|(name, ty)| (name.to_string(), json!(ty)))
            .collect();
        json!({
            "name": self.name,
            "description": self.description,
            "type": self.kind,
            "parameters": parameters,
        })
    }

    fn run(&self, params: &Map<String, Value>) -> Value {
        let tenant_id = params.get("tenant_id").cloned().unwrap_or(json!(1));
        let include_fees = params
            .get("include_fees")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        match self.name {
            "get_tenant_info" => json!({
                "id": tenant_id,
                "name": "Sample Tenant",
                "unit": "101",
                "status": "active",
            }),
            "calculate_balance" => {
                let fees = if include_fees { 50.0 } else { 0.0 };
                json!({"balance": 1500.0, "fees": fees, "total": 1500.0 + fees})
            }
            "send_notification" => json!({
                "sent": true,
                "method": "email",
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }),
            "generate_report" => json!({"report_id": "RPT-001", "format": "pdf", "pages": 5}),
            "analyze_payments" => json!({
                "tenant_id": tenant_id,
                "total_payments": 5,
                "average_amount": 1500.0,
                "on_time_percentage": 95.0,
            }),
            _ => json!({"status": "completed"}),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ToolRequest {
    Call {
        tool: String,
        #[serde(default)]
        params: Map<String, Value>,
    },
    List,
    Status,
}

impl NodeRequest for ToolRequest {
    const ACTIONS: &'static [&'static str] = &["call", "list", "status"];
}

/// Simulated tool server with a fixed catalog.
#[derive(Debug, Default)]
pub struct ToolServer {
    calls: u64,
}

impl LeafInterface for ToolServer {
    type Request = ToolRequest;
    const INTERFACE_TYPE: &'static str = "mcp_tools";
    const BASE_COST: u64 = 50;

    fn handle(&mut self, request: ToolRequest) -> Result<LeafOutput, NodeError> {
        match request {
            ToolRequest::Call { tool, params } => {
                let spec = TOOLS
                    .iter()
                    .find(|t| t.name == tool)
                    .ok_or_else(|| NodeError::NotFound(format!("tool {}", tool)))?;
                self.calls += 1;

                let output = spec.run(&params);
                let data = json!({
                    "tool": spec.name,
                    "type": spec.kind,
                    "input": params,
                    "output": output,
                });
                let extra = size_cost(payload_size(&data), 10);
                Ok(LeafOutput::new(data, extra))
            }
            ToolRequest::List => {
                let tools: Vec<Value> = TOOLS.iter().map(Tool::to_json).collect();
                let extra = tools.len() as u64 * 10;
                Ok(LeafOutput::new(Value::Array(tools), extra))
            }
            ToolRequest::Status => Ok(LeafOutput::new(self.describe(), 5)),
        }
    }

    fn describe(&self) -> Value {
        json!({
            "available": true,
            "tools_count": TOOLS.len(),
            "tools": TOOLS.iter().map(|t| t.name).collect::<Vec<_>>(),
            "calls": self.calls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(server: &mut ToolServer, tool: &str, params: Value) -> Result<LeafOutput, NodeError> {
        let params = params.as_object().cloned().unwrap_or_default();
        server.handle(ToolRequest::Call {
            tool: tool.into(),
            params,
        })
    }

    #[test]
    fn calls_known_tool() {
        let mut server = ToolServer::default();
        let output = call(&mut server, "get_tenant_info", json!({"tenant_id": 2})).unwrap();
        assert_eq!(output.data["output"]["id"], 2);
        assert_eq!(output.data["type"], "query");
        assert!(output.extra_cost > 0);
        assert_eq!(server.describe()["calls"], 1);
    }

    #[test]
    fn fees_are_optional() {
        let mut server = ToolServer::default();
        let with_fees =
            call(&mut server, "calculate_balance", json!({"include_fees": true})).unwrap();
        assert_eq!(with_fees.data["output"]["total"], 1550.0);
    }

    #[test]
    fn unknown_tool_is_not_found() {
        let mut server = ToolServer::default();
        let err = call(&mut server, "teleport", json!({})).unwrap_err();
        assert_eq!(err, NodeError::NotFound("tool teleport".into()));
    }

    #[test]
    fn list_covers_catalog() {
        let mut server = ToolServer::default();
        let output = server.handle(ToolRequest::List).unwrap();
        assert_eq!(output.data.as_array().unwrap().len(), 5);
        assert_eq!(output.extra_cost, 50);
    }
}
