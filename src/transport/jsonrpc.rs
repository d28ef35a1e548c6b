//! JSON-RPC 2.0 framing checks for inbound HTTP bodies.
//!
//! Only the envelope is inspected here; payload meaning belongs to the engine.

use crate::error::MuxError;
use serde_json::Value;
use std::collections::HashSet;

pub const JSONRPC_VERSION: &str = "2.0";
pub const INITIALIZE_METHOD: &str = "initialize";

/// Kind of a single JSON-RPC message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Notification,
    Response,
}

/// Classify a JSON value as a JSON-RPC message, or `None` if it is not one.
pub fn classify(value: &Value) -> Option<MessageKind> {
    let obj = value.as_object()?;
    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return None;
    }
    let id = obj.get("id").filter(|id| is_valid_id(id));
    match obj.get("method") {
        Some(Value::String(_)) => Some(match id {
            Some(_) => MessageKind::Request,
            None => MessageKind::Notification,
        }),
        Some(_) => None,
        None if id.is_some() && (obj.contains_key("result") || obj.contains_key("error")) => {
            Some(MessageKind::Response)
        }
        None => None,
    }
}

fn is_valid_id(id: &Value) -> bool {
    matches!(id, Value::String(_) | Value::Number(_))
}

/// Key used to match a response to the request that produced it.
///
/// `1` and `"1"` are different ids, so the key keeps the JSON encoding.
pub fn id_key(id: &Value) -> String {
    id.to_string()
}

/// Response-routing key of a message, if it is a response.
pub fn response_key(value: &Value) -> Option<String> {
    match classify(value)? {
        MessageKind::Response => value.get("id").map(id_key),
        _ => None,
    }
}

pub fn is_initialize_request(value: &Value) -> bool {
    classify(value) == Some(MessageKind::Request)
        && value.get("method").and_then(Value::as_str) == Some(INITIALIZE_METHOD)
}

/// A decoded POST body: one message or a batch.
#[derive(Debug, Clone)]
pub struct InboundBatch {
    messages: Vec<Value>,
    batch: bool,
}

impl InboundBatch {
    /// Parse and validate a request body.
    pub fn parse(body: &[u8]) -> Result<Self, MuxError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| MuxError::Parse(e.to_string()))?;
        let (messages, batch) = match value {
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(MuxError::InvalidRequest("empty batch".to_string()));
                }
                (items, true)
            }
            other => (vec![other], false),
        };
        if let Some(bad) = messages.iter().position(|m| classify(m).is_none()) {
            return Err(MuxError::InvalidRequest(format!(
                "message {bad} is not a JSON-RPC 2.0 message"
            )));
        }
        let parsed = Self { messages, batch };
        let mut keys = HashSet::new();
        let duplicate = parsed
            .request_keys()
            .into_iter()
            .find(|k| !keys.insert(k.clone()));
        if let Some(dup) = duplicate {
            return Err(MuxError::InvalidRequest(format!(
                "request id {dup} appears more than once in the batch"
            )));
        }
        Ok(parsed)
    }

    pub fn is_batch(&self) -> bool {
        self.batch
    }

    /// Number of messages; never zero.
    pub(crate) fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn has_initialize(&self) -> bool {
        self.messages.iter().any(is_initialize_request)
    }

    /// Routing keys of every request in the body, in order.
    pub fn request_keys(&self) -> Vec<String> {
        self.messages
            .iter()
            .filter(|m| classify(m) == Some(MessageKind::Request))
            .filter_map(|m| m.get("id").map(id_key))
            .collect()
    }

    pub fn into_messages(self) -> Vec<Value> {
        self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_envelopes() {
        assert_eq!(
            classify(&json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})),
            Some(MessageKind::Request)
        );
        assert_eq!(
            classify(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"})),
            Some(MessageKind::Notification)
        );
        assert_eq!(
            classify(&json!({"jsonrpc": "2.0", "id": "a", "result": {}})),
            Some(MessageKind::Response)
        );
        assert_eq!(
            classify(&json!({"jsonrpc": "2.0", "id": 7, "error": {"code": 1, "message": "x"}})),
            Some(MessageKind::Response)
        );
        assert_eq!(classify(&json!({"op": "ping"})), None);
        assert_eq!(classify(&json!({"jsonrpc": "1.0", "id": 1, "method": "ping"})), None);
        assert_eq!(classify(&json!({"jsonrpc": "2.0", "id": 1})), None);
        assert_eq!(classify(&json!([1, 2])), None);
    }

    #[test]
    fn null_id_request_is_a_notification() {
        assert_eq!(
            classify(&json!({"jsonrpc": "2.0", "id": null, "method": "ping"})),
            Some(MessageKind::Notification)
        );
    }

    #[test]
    fn detects_initialize() {
        let init = json!({"jsonrpc": "2.0", "id": 0, "method": "initialize", "params": {}});
        assert!(is_initialize_request(&init));
        let note = json!({"jsonrpc": "2.0", "method": "initialize"});
        assert!(!is_initialize_request(&note));
    }

    #[test]
    fn id_keys_distinguish_types() {
        assert_ne!(id_key(&json!(1)), id_key(&json!("1")));
        assert_eq!(
            response_key(&json!({"jsonrpc": "2.0", "id": 1, "result": null})),
            Some("1".to_string())
        );
        assert_eq!(
            response_key(&json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})),
            None
        );
    }

    #[test]
    fn parses_single_and_batch_bodies() {
        let single = InboundBatch::parse(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)
            .expect("single message should parse");
        assert!(!single.is_batch());
        assert_eq!(single.request_keys(), vec!["1".to_string()]);

        let batch = InboundBatch::parse(
            br#"[{"jsonrpc":"2.0","id":"a","method":"x"},{"jsonrpc":"2.0","method":"y"}]"#,
        )
        .expect("batch should parse");
        assert!(batch.is_batch());
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.request_keys(), vec!["\"a\"".to_string()]);
        assert!(!batch.has_initialize());
    }

    #[test]
    fn rejects_bad_bodies() {
        assert!(matches!(
            InboundBatch::parse(b"{not json"),
            Err(MuxError::Parse(_))
        ));
        assert!(matches!(
            InboundBatch::parse(b"[]"),
            Err(MuxError::InvalidRequest(_))
        ));
        assert!(matches!(
            InboundBatch::parse(br#"{"op":"ping"}"#),
            Err(MuxError::InvalidRequest(_))
        ));
    }

    #[test]
    fn rejects_batch_reusing_a_request_id() {
        let err = InboundBatch::parse(
            br#"[{"jsonrpc":"2.0","id":5,"method":"a"},{"jsonrpc":"2.0","id":5,"method":"b"}]"#,
        )
        .expect_err("duplicate ids must be rejected");
        assert!(matches!(err, MuxError::InvalidRequest(_)));
        assert_eq!(err.code(), crate::error::INVALID_REQUEST);

        // Same number under a different JSON type is a different id.
        let batch = InboundBatch::parse(
            br#"[{"jsonrpc":"2.0","id":5,"method":"a"},{"jsonrpc":"2.0","id":"5","method":"b"}]"#,
        )
        .expect("distinct ids should parse");
        assert_eq!(batch.request_keys().len(), 2);
    }
}
