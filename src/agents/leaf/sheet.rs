//! M121 - Spreadsheet workbooks.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{size_cost, LeafInterface, LeafOutput};
use crate::agents::{NodeError, NodeRequest};
use crate::util::payload_size;

pub(crate) const TENANT_WORKBOOK: &str = "tenants.xlsx";
const DEFAULT_SHEET: &str = "Sheet1";

fn default_workbook() -> String {
    TENANT_WORKBOOK.to_string()
}

fn default_sheet() -> String {
    DEFAULT_SHEET.to_string()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SheetRequest {
    /// Whole workbook
    Read {
        #[serde(default = "default_workbook")]
        path: String,
    },
    /// Replace a workbook; `data` maps sheet names to row arrays
    Write {
        path: String,
        data: Map<String, Value>,
    },
    GetSheet {
        #[serde(default = "default_workbook")]
        path: String,
        #[serde(default = "default_sheet")]
        sheet: String,
    },
    AddRow {
        #[serde(default = "default_workbook")]
        path: String,
        #[serde(default = "default_sheet")]
        sheet: String,
        data: Map<String, Value>,
    },
}

impl NodeRequest for SheetRequest {
    const ACTIONS: &'static [&'static str] = &["read", "write", "get_sheet", "add_row"];
}

type Workbook = BTreeMap<String, Vec<Value>>;

/// In-memory workbooks keyed by path.
#[derive(Debug)]
pub struct SheetStore {
    workbooks: BTreeMap<String, Workbook>,
}

impl Default for SheetStore {
    fn default() -> Self {
        let rows = vec![
            json!({"id": 1, "name": "John Doe", "unit": "101", "phone": "555-0101", "email": "john@example.com", "rent": 1500.0, "balance": 0.0}),
            json!({"id": 2, "name": "Jane Smith", "unit": "102", "phone": "555-0102", "email": "jane@example.com", "rent": 1600.0, "balance": 100.0}),
            json!({"id": 3, "name": "Bob Wilson", "unit": "201", "phone": "555-0201", "email": "bob@example.com", "rent": 1400.0, "balance": -50.0}),
        ];

        let mut workbooks = BTreeMap::new();
        workbooks.insert(
            TENANT_WORKBOOK.to_string(),
            Workbook::from([(DEFAULT_SHEET.to_string(), rows)]),
        );
        Self { workbooks }
    }
}

impl SheetStore {
    fn workbook(&self, path: &str) -> Result<&Workbook, NodeError> {
        self.workbooks
            .get(path)
            .ok_or_else(|| NodeError::NotFound(format!("workbook {}", path)))
    }
}

impl LeafInterface for SheetStore {
    type Request = SheetRequest;
    const INTERFACE_TYPE: &'static str = "spreadsheet";
    const BASE_COST: u64 = 15;

    fn handle(&mut self, request: SheetRequest) -> Result<LeafOutput, NodeError> {
        match request {
            SheetRequest::Read { path } => {
                let data = json!(self.workbook(&path)?);
                let extra = size_cost(payload_size(&data), 50);
                Ok(LeafOutput::new(data, extra))
            }
            SheetRequest::Write { path, data } => {
                let mut workbook = Workbook::new();
                for (sheet, rows) in data {
                    match rows {
                        Value::Array(rows) => {
                            workbook.insert(sheet, rows);
                        }
                        _ => {
                            return Err(NodeError::InvalidRequest(format!(
                                "sheet {} must be an array of rows",
                                sheet
                            )))
                        }
                    }
                }
                let bytes = payload_size(&json!(workbook));
                let sheets = workbook.len();
                self.workbooks.insert(path.clone(), workbook);
                Ok(LeafOutput::new(
                    json!({"path": path, "sheets": sheets, "written": true}),
                    size_cost(bytes, 25),
                ))
            }
            SheetRequest::GetSheet { path, sheet } => {
                let rows = self
                    .workbook(&path)?
                    .get(&sheet)
                    .ok_or_else(|| NodeError::NotFound(format!("sheet {} in {}", sheet, path)))?;
                let extra = rows.len() as u64 * 5;
                Ok(LeafOutput::new(Value::Array(rows.clone()), extra))
            }
            SheetRequest::AddRow { path, sheet, data } => {
                let rows = self
                    .workbooks
                    .entry(path.clone())
                    .or_default()
                    .entry(sheet.clone())
                    .or_default();
                rows.push(Value::Object(data));
                Ok(LeafOutput::new(
                    json!({"path": path, "sheet": sheet, "rows": rows.len()}),
                    20,
                ))
            }
        }
    }

    fn describe(&self) -> Value {
        json!({"workbooks": self.workbooks.keys().collect::<Vec<_>>()})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_sheet(store: &mut SheetStore, path: &str) -> Result<LeafOutput, NodeError> {
        store.handle(SheetRequest::GetSheet {
            path: path.into(),
            sheet: DEFAULT_SHEET.into(),
        })
    }

    #[test]
    fn seeded_tenant_sheet() {
        let mut store = SheetStore::default();
        let output = get_sheet(&mut store, TENANT_WORKBOOK).unwrap();
        assert_eq!(output.data.as_array().unwrap().len(), 3);
        assert_eq!(output.extra_cost, 15);
    }

    #[test]
    fn missing_workbook_is_not_found() {
        let mut store = SheetStore::default();
        let err = get_sheet(&mut store, "nope.xlsx").unwrap_err();
        assert!(matches!(err, NodeError::NotFound(_)));
    }

    #[test]
    fn add_row_creates_workbook_on_demand() {
        let mut store = SheetStore::default();
        let mut row = Map::new();
        row.insert("id".into(), json!(9));
        store
            .handle(SheetRequest::AddRow {
                path: "new.xlsx".into(),
                sheet: DEFAULT_SHEET.into(),
                data: row,
            })
            .unwrap();

        let output = get_sheet(&mut store, "new.xlsx").unwrap();
        assert_eq!(output.data, json!([{"id": 9}]));
    }

    #[test]
    fn write_rejects_non_array_sheets() {
        let mut store = SheetStore::default();
        let mut data = Map::new();
        data.insert("Sheet1".into(), json!({"id": 1}));
        let err = store
            .handle(SheetRequest::Write {
                path: "x.xlsx".into(),
                data,
            })
            .unwrap_err();
        assert!(matches!(err, NodeError::InvalidRequest(_)));
    }
}
