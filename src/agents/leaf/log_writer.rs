//! M112 - Log file writer.
//!
//! Every stored entry is mirrored to `tracing` at the matching level.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{size_cost, LeafInterface, LeafOutput};
use crate::agents::{NodeError, NodeRequest};
use crate::util::payload_size;

const DEFAULT_LOG_PATH: &str = "logs/app.log";

fn default_log_path() -> String {
    DEFAULT_LOG_PATH.to_string()
}

fn default_level() -> String {
    "INFO".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

impl FromStr for LogLevel {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(NodeError::InvalidRequest(format!(
                "unknown log level: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LogWriterRequest {
    Log {
        #[serde(default = "default_level")]
        level: String,
        #[serde(default)]
        message: String,
        #[serde(default)]
        node_id: Option<String>,
        #[serde(default = "default_log_path")]
        path: String,
    },
    Read {
        #[serde(default = "default_log_path")]
        path: String,
    },
    Clear {
        #[serde(default = "default_log_path")]
        path: String,
    },
}

impl NodeRequest for LogWriterRequest {
    const ACTIONS: &'static [&'static str] = &["log", "read", "clear"];
}

/// In-memory log files keyed by path.
#[derive(Debug, Default)]
pub struct LogWriter {
    files: HashMap<String, Vec<String>>,
}

impl LogWriter {
    fn mirror(level: LogLevel, source: &str, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(source, "{}", message),
            LogLevel::Info => tracing::info!(source, "{}", message),
            LogLevel::Warning => tracing::warn!(source, "{}", message),
            LogLevel::Error | LogLevel::Critical => tracing::error!(source, "{}", message),
        }
    }
}

impl LeafInterface for LogWriter {
    type Request = LogWriterRequest;
    const INTERFACE_TYPE: &'static str = "log_file";
    const BASE_COST: u64 = 5;

    fn handle(&mut self, request: LogWriterRequest) -> Result<LeafOutput, NodeError> {
        match request {
            LogWriterRequest::Log {
                level,
                message,
                node_id,
                path,
            } => {
                let level: LogLevel = level.parse()?;
                let source = node_id.unwrap_or_else(|| "-".to_string());
                let entry = format!(
                    "{} - {} - {} - {}",
                    chrono::Utc::now().to_rfc3339(),
                    level.as_str(),
                    source,
                    message
                );

                Self::mirror(level, &source, &message);

                let lines = self.files.entry(path.clone()).or_default();
                lines.push(entry.clone());
                Ok(LeafOutput::new(
                    json!({"path": path, "entry": entry, "line": lines.len()}),
                    size_cost(message.len() as u64, 100),
                ))
            }
            LogWriterRequest::Read { path } => {
                let entries = self.files.get(&path).cloned().unwrap_or_default();
                let data = json!({"path": path, "entries": entries});
                let extra = size_cost(payload_size(&data), 200);
                Ok(LeafOutput::new(data, extra))
            }
            LogWriterRequest::Clear { path } => {
                self.files.remove(&path);
                Ok(LeafOutput::new(json!({"cleared": path}), 0))
            }
        }
    }

    fn describe(&self) -> Value {
        let entries: usize = self.files.values().map(Vec::len).sum();
        json!({"files": self.files.len(), "entries": entries})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(writer: &mut LogWriter, level: &str, message: &str) -> Result<LeafOutput, NodeError> {
        writer.handle(LogWriterRequest::Log {
            level: level.into(),
            message: message.into(),
            node_id: Some("M110".into()),
            path: DEFAULT_LOG_PATH.into(),
        })
    }

    #[test]
    fn entries_are_appended_and_read_back() {
        let mut writer = LogWriter::default();
        log(&mut writer, "info", "first").unwrap();
        log(&mut writer, "ERROR", "second").unwrap();

        let output = writer
            .handle(LogWriterRequest::Read {
                path: DEFAULT_LOG_PATH.into(),
            })
            .unwrap();
        let entries = output.data["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].as_str().unwrap().ends_with("INFO - M110 - first"));
        assert!(entries[1].as_str().unwrap().contains("ERROR"));
    }

    #[test]
    fn unknown_level_is_rejected() {
        let mut writer = LogWriter::default();
        let err = log(&mut writer, "LOUD", "x").unwrap_err();
        assert!(matches!(err, NodeError::InvalidRequest(_)));
    }

    #[test]
    fn long_messages_cost_more() {
        let mut writer = LogWriter::default();
        let output = log(&mut writer, "INFO", &"x".repeat(250)).unwrap();
        assert_eq!(output.extra_cost, 2);
    }

    #[test]
    fn clear_removes_entries() {
        let mut writer = LogWriter::default();
        log(&mut writer, "INFO", "x").unwrap();
        writer
            .handle(LogWriterRequest::Clear {
                path: DEFAULT_LOG_PATH.into(),
            })
            .unwrap();
        assert_eq!(writer.describe()["entries"], 0);
    }
}
