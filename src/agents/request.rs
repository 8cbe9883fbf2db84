//! Decoding of opaque request maps into typed per-role requests.
//!
//! Every node role declares a closed enum of the actions it understands,
//! tagged by the `action` key. Unknown actions are rejected here, before any
//! node logic runs.

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::NodeError;

/// A closed set of actions understood by one node role.
pub trait NodeRequest: DeserializeOwned {
    /// Action names accepted by this role, in `snake_case`.
    const ACTIONS: &'static [&'static str];
}

/// Decode an opaque request map.
///
/// # Errors
/// - `InvalidRequest` if `action` is missing or not a string, or if the
///   fields of a known action are malformed
/// - `UnknownAction` carrying the literal action name otherwise
pub fn decode_request<R: NodeRequest>(request: Value) -> Result<R, NodeError> {
    let action = match request.get("action") {
        Some(Value::String(action)) => action.clone(),
        Some(other) => {
            return Err(NodeError::InvalidRequest(format!(
                "action must be a string, got {}",
                other
            )))
        }
        None => return Err(NodeError::InvalidRequest("missing action".to_string())),
    };

    if !R::ACTIONS.contains(&action.as_str()) {
        return Err(NodeError::UnknownAction(action));
    }

    serde_json::from_value(request)
        .map_err(|e| NodeError::InvalidRequest(format!("{}: {}", action, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(tag = "action", rename_all = "snake_case")]
    enum Sample {
        Ping,
        Echo { text: String },
    }

    impl NodeRequest for Sample {
        const ACTIONS: &'static [&'static str] = &["ping", "echo"];
    }

    #[test]
    fn decodes_known_actions() {
        assert_eq!(
            decode_request::<Sample>(json!({"action": "ping", "extra": 1})),
            Ok(Sample::Ping)
        );
        assert_eq!(
            decode_request::<Sample>(json!({"action": "echo", "text": "hi"})),
            Ok(Sample::Echo { text: "hi".into() })
        );
    }

    #[test]
    fn unknown_action_carries_literal_name() {
        assert_eq!(
            decode_request::<Sample>(json!({"action": "bogus"})),
            Err(NodeError::UnknownAction("bogus".into()))
        );
    }

    #[test]
    fn malformed_requests_are_invalid() {
        assert!(matches!(
            decode_request::<Sample>(json!({"text": "hi"})),
            Err(NodeError::InvalidRequest(_))
        ));
        assert!(matches!(
            decode_request::<Sample>(json!({"action": 7})),
            Err(NodeError::InvalidRequest(_))
        ));
        assert!(matches!(
            decode_request::<Sample>(json!({"action": "echo"})),
            Err(NodeError::InvalidRequest(_))
        ));
        assert!(matches!(
            decode_request::<Sample>(json!("ping")),
            Err(NodeError::InvalidRequest(_))
        ));
    }
}
