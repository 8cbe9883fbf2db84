//! M111 - YAML configuration store.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{json, Value};

use super::{size_cost, LeafInterface, LeafOutput};
use crate::agents::{NodeError, NodeRequest};
use crate::util::payload_size;

/// Served for any path that was never written.
const DEFAULT_DOCUMENT: &str = r#"
database:
  host: localhost
  port: 5432
  name: tenant_db
logging:
  level: INFO
  format: "{timestamp} - {level} - {node} - {message}"
api:
  host: 0.0.0.0
  port: 8000
  debug: false
"#;

pub(crate) fn default_config_path() -> String {
    crate::config::DEFAULT_CONFIG_PATH.to_string()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ConfigStoreRequest {
    Read {
        #[serde(default = "default_config_path")]
        path: String,
    },
    Write {
        #[serde(default = "default_config_path")]
        path: String,
        data: Value,
    },
}

impl NodeRequest for ConfigStoreRequest {
    const ACTIONS: &'static [&'static str] = &["read", "write"];
}

/// In-memory YAML documents keyed by path.
#[derive(Debug, Default)]
pub struct ConfigStore {
    documents: HashMap<String, Value>,
}

impl ConfigStore {
    fn default_document() -> Result<Value, NodeError> {
        serde_yaml::from_str(DEFAULT_DOCUMENT)
            .map_err(|e| NodeError::InternalFault(format!("default config: {}", e)))
    }
}

impl LeafInterface for ConfigStore {
    type Request = ConfigStoreRequest;
    const INTERFACE_TYPE: &'static str = "yaml_file";
    const BASE_COST: u64 = 10;

    fn handle(&mut self, request: ConfigStoreRequest) -> Result<LeafOutput, NodeError> {
        match request {
            ConfigStoreRequest::Read { path } => {
                let document = match self.documents.get(&path) {
                    Some(document) => document.clone(),
                    None => Self::default_document()?,
                };
                let extra = size_cost(payload_size(&document), 100);
                Ok(LeafOutput::new(document, extra))
            }
            ConfigStoreRequest::Write { path, data } => {
                if !data.is_object() {
                    return Err(NodeError::InvalidRequest(
                        "config document must be a mapping".to_string(),
                    ));
                }
                let text = serde_yaml::to_string(&data)
                    .map_err(|e| NodeError::InvalidRequest(e.to_string()))?;
                let bytes = text.len() as u64;
                self.documents.insert(path.clone(), data);
                Ok(LeafOutput::new(
                    json!({"path": path, "written": true, "bytes": bytes}),
                    size_cost(bytes, 50),
                ))
            }
        }
    }

    fn describe(&self) -> Value {
        json!({
            "documents": self.documents.keys().collect::<Vec<_>>(),
        })
    }
}
