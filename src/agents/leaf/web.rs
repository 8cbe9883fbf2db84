//! M221 - REST gateway.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{size_cost, LeafInterface, LeafOutput};
use crate::agents::{NodeError, NodeRequest};
use crate::util::payload_size;

/// Endpoints served by the gateway.
pub(crate) const ENDPOINTS: &[&str] = &[
    "/api/tenants",
    "/api/tenants/{id}",
    "/api/payments",
    "/api/reports",
];

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WebRequest {
    Get {
        url: String,
    },
    Post {
        url: String,
        #[serde(default)]
        data: Map<String, Value>,
    },
    Put {
        url: String,
        #[serde(default)]
        data: Map<String, Value>,
    },
    Delete {
        url: String,
    },
}

impl NodeRequest for WebRequest {
    const ACTIONS: &'static [&'static str] = &["get", "post", "put", "delete"];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Tenants,
    Tenant(u64),
    Payments,
    Reports,
}

impl Route {
    fn parse(url: &str) -> Result<Self, NodeError> {
        let path = url.split('?').next().unwrap_or(url).trim_end_matches('/');
        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        match segments.as_slice() {
            ["api", "tenants"] => Ok(Self::Tenants),
            ["api", "tenants", id] => id
                .parse()
                .map(Self::Tenant)
                .map_err(|_| NodeError::InvalidRequest(format!("bad tenant id in {}", url))),
            ["api", "payments"] => Ok(Self::Payments),
            ["api", "reports"] => Ok(Self::Reports),
            _ => Err(NodeError::NotFound(format!("endpoint {}", url))),
        }
    }
}

/// In-memory REST backend with tenant, payment and report endpoints.
#[derive(Debug)]
pub struct WebGateway {
    tenants: Vec<Map<String, Value>>,
    payments: Vec<Map<String, Value>>,
}

fn record(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn next_id(rows: &[Map<String, Value>]) -> u64 {
    rows.iter()
        .filter_map(|r| r.get("id").and_then(Value::as_u64))
        .max()
        .map_or(1, |max| max + 1)
}

fn id_of(row: &Map<String, Value>) -> Option<u64> {
    row.get("id").and_then(Value::as_u64)
}

impl Default for WebGateway {
    fn default() -> Self {
        Self {
            tenants: vec![
                record(json!({"id": 1, "name": "John Doe", "unit": "101"})),
                record(json!({"id": 2, "name": "Jane Smith", "unit": "102"})),
            ],
            payments: vec![record(json!({"id": 1, "tenant_id": 1, "amount": 1500.0}))],
        }
    }
}

impl WebGateway {
    fn tenant_mut(&mut self, id: u64) -> Result<&mut Map<String, Value>, NodeError> {
        self.tenants
            .iter_mut()
            .find(|t| id_of(t) == Some(id))
            .ok_or_else(|| NodeError::NotFound(format!("tenant {}", id)))
    }

    fn get(&mut self, route: Route) -> Result<Value, NodeError> {
        match route {
            Route::Tenants => Ok(json!(self.tenants)),
            Route::Tenant(id) => self.tenant_mut(id).map(|t| Value::Object(t.clone())),
            Route::Payments => Ok(json!(self.payments)),
            Route::Reports => Ok(json!({"reports": ["monthly", "quarterly", "annual"]})),
        }
    }

    fn post(&mut self, route: Route, data: Map<String, Value>) -> Result<Value, NodeError> {
        let table = match route {
            Route::Tenants => &mut self.tenants,
            Route::Payments => &mut self.payments,
            Route::Reports => {
                let report_type = data.get("type").cloned().unwrap_or(json!("unknown"));
                return Ok(json!({"status": "accepted", "report_type": report_type}));
            }
            Route::Tenant(id) => {
                return Err(NodeError::InvalidRequest(format!(
                    "cannot post to /api/tenants/{}",
                    id
                )))
            }
        };

        let mut row = Map::new();
        row.insert("id".into(), json!(next_id(table)));
        row.extend(data.into_iter().filter(|(k, _)| k != "id"));
        table.push(row.clone());
        Ok(Value::Object(row))
    }
}

impl LeafInterface for WebGateway {
    type Request = WebRequest;
    const INTERFACE_TYPE: &'static str = "http_api";
    const BASE_COST: u64 = 25;

    fn handle(&mut self, request: WebRequest) -> Result<LeafOutput, NodeError> {
        let data = match request {
            WebRequest::Get { url } => self.get(Route::parse(&url)?)?,
            WebRequest::Post { url, data } => self.post(Route::parse(&url)?, data)?,
            WebRequest::Put { url, data } => match Route::parse(&url)? {
                Route::Tenant(id) => {
                    let tenant = self.tenant_mut(id)?;
                    tenant.extend(data.into_iter().filter(|(k, _)| k != "id"));
                    Value::Object(tenant.clone())
                }
                _ => return Err(NodeError::NotFound(format!("endpoint PUT {}", url))),
            },
            WebRequest::Delete { url } => match Route::parse(&url)? {
                Route::Tenant(id) => {
                    self.tenants.retain(|t| id_of(t) != Some(id));
                    json!({"deleted": id})
                }
                _ => return Err(NodeError::NotFound(format!("endpoint DELETE {}", url))),
            },
        };

        let extra = size_cost(payload_size(&data), 15);
        Ok(LeafOutput::new(data, extra))
    }

    fn describe(&self) -> Value {
        json!({
            "base_url": "http://localhost:8000",
            "endpoints": ENDPOINTS,
        })
    }
}
