//! M122 - Tenant database.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{LeafInterface, LeafOutput};
use crate::agents::{NodeError, NodeRequest};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    #[serde(default)]
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub rent: f64,
    #[serde(default)]
    pub balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: u64,
    pub tenant_id: u64,
    pub amount: f64,
    pub date: String,
    pub method: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DatabaseRequest {
    GetTenants,
    GetTenant { id: u64 },
    AddTenant { data: Value },
    GetPayments { tenant_id: u64 },
}

impl NodeRequest for DatabaseRequest {
    const ACTIONS: &'static [&'static str] =
        &["get_tenants", "get_tenant", "add_tenant", "get_payments"];
}

/// In-memory tenant and payment tables.
#[derive(Debug)]
pub struct TenantDatabase {
    tenants: Vec<Tenant>,
    payments: Vec<Payment>,
    next_tenant_id: u64,
}

impl Default for TenantDatabase {
    fn default() -> Self {
        let tenant = |id, name: &str, unit: &str, phone: &str, email: &str, rent, balance| Tenant {
            id,
            name: name.to_string(),
            unit: unit.to_string(),
            phone: phone.to_string(),
            email: email.to_string(),
            rent,
            balance,
        };
        let payment = |id, tenant_id, amount, method: &str| Payment {
            id,
            tenant_id,
            amount,
            date: "2024-01-01".to_string(),
            method: method.to_string(),
        };

        Self {
            tenants: vec![
                tenant(1, "John Doe", "101", "555-0101", "john@example.com", 1500.0, 0.0),
                tenant(2, "Jane Smith", "102", "555-0102", "jane@example.com", 1600.0, 100.0),
                tenant(3, "Bob Wilson", "201", "555-0201", "bob@example.com", 1400.0, -50.0),
            ],
            payments: vec![
                payment(1, 1, 1500.0, "check"),
                payment(2, 2, 1600.0, "transfer"),
            ],
            next_tenant_id: 4,
        }
    }
}

impl LeafInterface for TenantDatabase {
    type Request = DatabaseRequest;
    const INTERFACE_TYPE: &'static str = "database";
    const BASE_COST: u64 = 20;

    fn handle(&mut self, request: DatabaseRequest) -> Result<LeafOutput, NodeError> {
        match request {
            DatabaseRequest::GetTenants => {
                let extra = self.tenants.len() as u64 * 5;
                Ok(LeafOutput::new(json!(self.tenants), extra))
            }
            DatabaseRequest::GetTenant { id } => {
                let tenant = self
                    .tenants
                    .iter()
                    .find(|t| t.id == id)
                    .ok_or_else(|| NodeError::NotFound(format!("tenant {}", id)))?;
                Ok(LeafOutput::new(json!(tenant), 25))
            }
            DatabaseRequest::AddTenant { data } => {
                let mut tenant: Tenant = serde_json::from_value(data)
                    .map_err(|e| NodeError::InvalidRequest(format!("tenant record: {}", e)))?;
                tenant.id = self.next_tenant_id;
                self.next_tenant_id += 1;
                let id = tenant.id;
                self.tenants.push(tenant);
                Ok(LeafOutput::new(json!({"id": id, "action": "insert"}), 40))
            }
            DatabaseRequest::GetPayments { tenant_id } => {
                let payments: Vec<&Payment> = self
                    .payments
                    .iter()
                    .filter(|p| p.tenant_id == tenant_id)
                    .collect();
                let extra = payments.len() as u64 * 3;
                Ok(LeafOutput::new(json!(payments), extra))
            }
        }
    }

    fn describe(&self) -> Value {
        json!({
            "tables": {
                "tenants": self.tenants.len(),
                "payments": self.payments.len(),
            }
        })
    }
}
