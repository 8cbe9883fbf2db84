//! M222 - Report generator producing (simulated) PDF documents.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::{LeafInterface, LeafOutput};
use crate::agents::{NodeError, NodeRequest};
use crate::util::payload_size;

/// Layout used to render a report. Unrecognised names fall back to `General`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    TenantStatement,
    PaymentHistory,
    BalanceSummary,
    General,
}

impl ReportKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "tenant_statement" => Self::TenantStatement,
            "payment_history" => Self::PaymentHistory,
            "balance_summary" => Self::BalanceSummary,
            _ => Self::General,
        }
    }

    fn render(&self, data: &Value, today: &str) -> Vec<Value> {
        match self {
            Self::TenantStatement => vec![
                json!({"type": "header", "text": format!("Tenant Statement - {}", text_field(data, "name", "Unknown"))}),
                json!({"type": "info", "label": "Unit", "value": text_field(data, "unit", "N/A")}),
                json!({"type": "info", "label": "Monthly Rent", "value": money(number_field(data, "rent"))}),
                json!({"type": "info", "label": "Current Balance", "value": money(number_field(data, "balance"))}),
                json!({"type": "footer", "text": format!("Generated on {}", today)}),
            ],
            Self::PaymentHistory => {
                let payments = list_field(data, "payments");
                let mut content = vec![json!({"type": "header", "text": "Payment History Report"})];
                let mut total = 0.0;
                for payment in payments {
                    let amount = number_field(payment, "amount");
                    total += amount;
                    content.push(json!({
                        "type": "row",
                        "date": text_field(payment, "date", "N/A"),
                        "amount": money(amount),
                        "method": text_field(payment, "method", "N/A"),
                    }));
                }
                content.push(json!({"type": "summary", "total": money(total), "count": payments.len()}));
                content
            }
            Self::BalanceSummary => {
                let tenants = list_field(data, "tenants");
                let mut content = vec![json!({"type": "header", "text": "Building Balance Summary"})];
                let (mut rent, mut balance) = (0.0, 0.0);
                for tenant in tenants {
                    rent += number_field(tenant, "rent");
                    balance += number_field(tenant, "balance");
                    content.push(json!({
                        "type": "row",
                        "name": text_field(tenant, "name", "Unknown"),
                        "unit": text_field(tenant, "unit", "N/A"),
                        "balance": money(number_field(tenant, "balance")),
                    }));
                }
                content.push(json!({
                    "type": "summary",
                    "total_units": tenants.len(),
                    "total_monthly_rent": money(rent),
                    "total_balance": money(balance),
                }));
                content
            }
            Self::General => vec![json!({"type": "text", "content": data.to_string()})],
        }
    }
}

fn text_field(data: &Value, key: &str, fallback: &str) -> String {
    match data.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => fallback.to_string(),
        Some(other) => other.to_string(),
    }
}

fn number_field(data: &Value, key: &str) -> f64 {
    data.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn list_field<'a>(data: &'a Value, key: &str) -> &'a [Value] {
    data.get(key)
        .and_then(Value::as_array)
        .map_or(&[], Vec::as_slice)
}

/// `1234.5` -> `$1,234.50`
pub fn money(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let digits = (cents / 100).to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}${}.{:02}", sign, grouped, cents % 100)
}

fn title_case(name: &str) -> String {
    name.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn default_report_type() -> String {
    "general".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReportRequest {
    Generate {
        #[serde(default = "default_report_type")]
        report_type: String,
        #[serde(default)]
        data: Value,
        #[serde(default)]
        output_path: Option<String>,
    },
    Read {
        path: String,
    },
    List,
}

impl NodeRequest for ReportRequest {
    const ACTIONS: &'static [&'static str] = &["generate", "read", "list"];
}

#[derive(Debug, Clone, Serialize)]
struct Document {
    document_id: Uuid,
    title: String,
    report_type: String,
    content: Vec<Value>,
    pages: u64,
    size_bytes: u64,
    created: DateTime<Utc>,
}

/// Generated documents keyed by output path.
#[derive(Debug, Default)]
pub struct ReportGenerator {
    documents: BTreeMap<String, Document>,
}

impl LeafInterface for ReportGenerator {
    type Request = ReportRequest;
    const INTERFACE_TYPE: &'static str = "pdf_file";
    const BASE_COST: u64 = 40;

    fn handle(&mut self, request: ReportRequest) -> Result<LeafOutput, NodeError> {
        match request {
            ReportRequest::Generate {
                report_type,
                data,
                output_path,
            } => {
                let created = Utc::now();
                let path = output_path.unwrap_or_else(|| {
                    format!("reports/{}_{}.pdf", report_type, created.format("%Y%m%d"))
                });

                let kind = ReportKind::from_name(&report_type);
                let content = kind.render(&data, &created.format("%Y-%m-%d").to_string());
                let pages = (content.len() as u64 / 3).max(1);
                let size_bytes = payload_size(&json!(content)) * 2;

                let document = Document {
                    document_id: Uuid::new_v4(),
                    title: format!("{} Report", title_case(&report_type)),
                    report_type,
                    content,
                    pages,
                    size_bytes,
                    created,
                };
                let data = json!({
                    "path": path,
                    "document_id": document.document_id,
                    "report_type": document.report_type,
                    "pages": pages,
                    "size": size_bytes,
                    "created": true,
                });
                tracing::debug!(path = %path, pages, "Report generated");
                self.documents.insert(path, document);
                Ok(LeafOutput::new(data, size_bytes / 10))
            }
            ReportRequest::Read { path } => {
                let document = self
                    .documents
                    .get(&path)
                    .ok_or_else(|| NodeError::NotFound(format!("document {}", path)))?;
                let data = json!({
                    "filename": path,
                    "title": document.title,
                    "pages": document.pages,
                    "size": document.size_bytes,
                    "metadata": {
                        "document_id": document.document_id,
                        "created": document.created.to_rfc3339(),
                        "report_type": document.report_type,
                    },
                });
                Ok(LeafOutput::new(data, document.size_bytes / 50))
            }
            ReportRequest::List => {
                let documents: Vec<&String> = self.documents.keys().collect();
                let extra = documents.len() as u64 * 2;
                Ok(LeafOutput::new(
                    json!({"documents": documents, "count": documents.len()}),
                    extra,
                ))
            }
        }
    }

    fn describe(&self) -> Value {
        json!({"documents": self.documents.len()})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate(
        generator: &mut ReportGenerator,
        report_type: &str,
        data: Value,
        path: Option<&str>,
    ) -> LeafOutput {
        generator
            .handle(ReportRequest::Generate {
                report_type: report_type.into(),
                data,
                output_path: path.map(String::from),
            })
            .unwrap()
    }

    #[test]
    fn money_groups_thousands() {
        assert_eq!(money(1500.0), "$1,500.00");
        assert_eq!(money(1234567.891), "$1,234,567.89");
        assert_eq!(money(0.0), "$0.00");
        assert_eq!(money(-50.0), "-$50.00");
    }

    #[test]
    fn tenant_statement_layout() {
        let content = ReportKind::TenantStatement.render(
            &json!({"name": "John Doe", "unit": "101", "rent": 1500}),
            "2024-01-01",
        );
        assert_eq!(content.len(), 5);
        assert_eq!(content[0]["text"], "Tenant Statement - John Doe");
        assert_eq!(content[2]["value"], "$1,500.00");
        assert_eq!(content[3]["value"], "$0.00");
    }

    #[test]
    fn payment_history_totals() {
        let content = ReportKind::PaymentHistory.render(
            &json!({"payments": [{"amount": 1500, "method": "check"}, {"amount": 250.5}]}),
            "2024-01-01",
        );
        let summary = content.last().unwrap();
        assert_eq!(summary["total"], "$1,750.50");
        assert_eq!(summary["count"], 2);
    }

    #[test]
    fn generate_then_read_and_list() {
        let mut generator = ReportGenerator::default();
        let output = generate(
            &mut generator,
            "tenant_statement",
            json!({"name": "Jane"}),
            Some("reports/jane.pdf"),
        );
        assert_eq!(output.data["path"], "reports/jane.pdf");
        assert_eq!(output.data["pages"], 1);
        assert_eq!(output.extra_cost, output.data["size"].as_u64().unwrap() / 10);

        let read = generator
            .handle(ReportRequest::Read {
                path: "reports/jane.pdf".into(),
            })
            .unwrap();
        assert_eq!(read.data["title"], "Tenant Statement Report");

        let list = generator.handle(ReportRequest::List).unwrap();
        assert_eq!(list.data["count"], 1);
    }

    #[test]
    fn default_path_uses_type_and_date() {
        let mut generator = ReportGenerator::default();
        let output = generate(&mut generator, "balance_summary", json!({}), None);
        let path = output.data["path"].as_str().unwrap();
        assert!(path.starts_with("reports/balance_summary_"));
        assert!(path.ends_with(".pdf"));
    }

    #[test]
    fn reading_missing_document_fails() {
        let mut generator = ReportGenerator::default();
        let err = generator
            .handle(ReportRequest::Read {
                path: "nope.pdf".into(),
            })
            .unwrap_err();
        assert!(matches!(err, NodeError::NotFound(_)));
    }
}
