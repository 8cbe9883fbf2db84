//! M212 - Resource library: prompts, schemas, templates and static data.
//!
//! Prompt templates accept both `{name}` and `{{name}}` placeholders.
//! Placeholders without a matching variable are left in place.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{size_cost, LeafInterface, LeafOutput};
use crate::agents::{NodeError, NodeRequest};
use crate::util::payload_size;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Prompt,
    Schema,
    Template,
    Data,
}

#[derive(Debug, Clone)]
struct Resource {
    name: &'static str,
    kind: ResourceKind,
    description: &'static str,
    content: Value,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResourceRequest {
    Fetch {
        uri: String,
    },
    Render {
        uri: String,
        #[serde(default)]
        variables: Map<String, Value>,
    },
    List,
    Status,
}

impl NodeRequest for ResourceRequest {
    const ACTIONS: &'static [&'static str] = &["fetch", "render", "list", "status"];
}

/// Fixed resource catalog keyed by URI.
#[derive(Debug)]
pub struct ResourceLibrary {
    resources: BTreeMap<&'static str, Resource>,
}

impl Default for ResourceLibrary {
    fn default() -> Self {
        let resources = [
            (
                "prompt://tenant-report",
                Resource {
                    name: "Tenant Report Prompt",
                    kind: ResourceKind::Prompt,
                    description: "Prompt for generating tenant reports",
                    content: json!({
                        "template": "Generate a report for tenant {tenant_name} in unit {unit}.",
                        "variables": ["tenant_name", "unit", "period"],
                    }),
                },
            ),
            (
                "prompt://payment-reminder",
                Resource {
                    name: "Payment Reminder Prompt",
                    kind: ResourceKind::Prompt,
                    description: "Prompt for payment reminder messages",
                    content: json!({
                        "template": "Dear {tenant_name}, your rent of ${amount} is due on {due_date}.",
                        "variables": ["tenant_name", "amount", "due_date"],
                    }),
                },
            ),
            (
                "schema://tenant",
                Resource {
                    name: "Tenant Schema",
                    kind: ResourceKind::Schema,
                    description: "JSON schema for tenant data",
                    content: json!({
                        "type": "object",
                        "properties": {
                            "id": {"type": "integer"},
                            "name": {"type": "string"},
                            "unit": {"type": "string"},
                            "rent": {"type": "number"},
                        },
                        "required": ["name", "unit", "rent"],
                    }),
                },
            ),
            (
                "template://invoice",
                Resource {
                    name: "Invoice Template",
                    kind: ResourceKind::Template,
                    description: "Template for generating invoices",
                    content: json!({
                        "header": "Residential Complex Invoice",
                        "fields": ["tenant_name", "unit", "amount", "due_date", "items"],
                        "footer": "Thank you for your payment",
                    }),
                },
            ),
            (
                "data://building-info",
                Resource {
                    name: "Building Information",
                    kind: ResourceKind::Data,
                    description: "Static building information",
                    content: json!({
                        "name": "Sunset Apartments",
                        "address": "123 Main Street",
                        "units": 50,
                        "floors": 5,
                        "amenities": ["gym", "pool", "parking"],
                    }),
                },
            ),
        ];

        Self {
            resources: resources.into_iter().collect(),
        }
    }
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*(\w+)\s*\}\}|\{(\w+)\}").expect("placeholder pattern is valid")
    })
}

/// Substitute `{name}` / `{{name}}` placeholders.
pub fn render_template(template: &str, variables: &Map<String, Value>) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures| {
            let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            match variables.get(name) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

impl ResourceLibrary {
    fn resource(&self, uri: &str) -> Result<&Resource, NodeError> {
        self.resources
            .get(uri)
            .ok_or_else(|| NodeError::NotFound(format!("resource {}", uri)))
    }

    fn envelope(uri: &str, resource: &Resource, content: Value) -> Value {
        json!({
            "uri": uri,
            "name": resource.name,
            "type": resource.kind,
            "content": content,
        })
    }
}

impl LeafInterface for ResourceLibrary {
    type Request = ResourceRequest;
    const INTERFACE_TYPE: &'static str = "mcp_resources";
    const BASE_COST: u64 = 30;

    fn handle(&mut self, request: ResourceRequest) -> Result<LeafOutput, NodeError> {
        match request {
            ResourceRequest::Fetch { uri } => {
                let resource = self.resource(&uri)?;
                let data = Self::envelope(&uri, resource, resource.content.clone());
                let extra = size_cost(payload_size(&data), 20);
                Ok(LeafOutput::new(data, extra))
            }
            ResourceRequest::Render { uri, variables } => {
                let resource = self.resource(&uri)?;
                let template = resource
                    .content
                    .get("template")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        NodeError::InvalidRequest(format!("resource {} is not a template", uri))
                    })?;

                let mut content = resource.content.clone();
                content["rendered"] = json!(render_template(template, &variables));

                let data = Self::envelope(&uri, resource, content);
                let extra = size_cost(payload_size(&data), 15);
                Ok(LeafOutput::new(data, extra))
            }
            ResourceRequest::List => {
                let list: Vec<Value> = self
                    .resources
                    .iter()
                    .map(|(uri, r)| {
                        json!({
                            "uri": uri,
                            "name": r.name,
                            "type": r.kind,
                            "description": r.description,
                        })
                    })
                    .collect();
                let extra = list.len() as u64 * 5;
                Ok(LeafOutput::new(Value::Array(list), extra))
            }
            ResourceRequest::Status => Ok(LeafOutput::new(self.describe(), 5)),
        }
    }

    fn describe(&self) -> Value {
        let mut kinds: Vec<ResourceKind> = self.resources.values().map(|r| r.kind).collect();
        kinds.dedup();
        json!({
            "available": true,
            "resources_count": self.resources.len(),
            "resource_types": kinds,
        })
    }
}
