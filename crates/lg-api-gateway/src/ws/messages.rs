//! Event surface frames.
//!
//! Client → server: `subscribe` / `unsubscribe` with a `topic`, and `call`
//! with an `id`, a node `method` and its `params`.
//! Server → client: `subscribed`, `unsubscribed`, `event`, `result`, `error`.

use crate::domain::error::codes;
use crate::domain::{Event, SignedTx, Topic};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Control message sent by a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Subscribe(Topic),
    Unsubscribe(Topic),
    Call(NodeCall),
}

/// A node RPC request carried over the event connection.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeCall {
    /// Echoed in the reply; `null` when the client sent none.
    pub id: Value,
    pub request: NodeRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeRequest {
    Status,
    Query { path: String, data: Vec<u8> },
    Broadcast(SignedTx),
}

#[derive(Deserialize)]
struct QueryParams {
    path: String,
    #[serde(default)]
    data: String,
}

/// Reply or notice sent to one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Subscribed { topic: Topic },
    Unsubscribed { topic: Topic },
    Event { topic: Topic, payload: Value },
    Result { id: Value, result: Value },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        code: i32,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(err: &ControlError) -> Self {
        ServerMessage::Error {
            id: None,
            code: err.code,
            message: err.message.clone(),
        }
    }

    /// Error reply to the call identified by `id`.
    pub fn call_error(id: Value, err: &ControlError) -> Self {
        ServerMessage::Error {
            id: Some(id),
            code: err.code,
            message: err.message.clone(),
        }
    }
}

/// A malformed control message. Reported to its connection only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ControlError {
    pub code: i32,
    pub message: String,
}

impl ControlError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Parse a client text frame.
pub fn parse_control(text: &str) -> Result<ClientMessage, ControlError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ControlError::new(codes::PARSE_ERROR, format!("parse error: {}", e)))?;

    let Some(obj) = value.as_object() else {
        return Err(ControlError::new(
            codes::INVALID_REQUEST,
            "control message must be a JSON object",
        ));
    };

    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ControlError::new(codes::INVALID_REQUEST, "missing 'type'"))?;

    let topic = || -> Result<Topic, ControlError> {
        let raw = obj
            .get("topic")
            .and_then(Value::as_str)
            .ok_or_else(|| ControlError::new(codes::INVALID_PARAMS, "missing 'topic'"))?;
        Topic::parse(raw).map_err(|e| ControlError::new(codes::INVALID_PARAMS, e.to_string()))
    };

    match kind {
        "subscribe" => Ok(ClientMessage::Subscribe(topic()?)),
        "unsubscribe" => Ok(ClientMessage::Unsubscribe(topic()?)),
        "call" => parse_call(obj).map(ClientMessage::Call),
        other => Err(ControlError::new(
            codes::INVALID_REQUEST,
            format!("unknown message type '{}'", other),
        )),
    }
}

fn parse_call(obj: &serde_json::Map<String, Value>) -> Result<NodeCall, ControlError> {
    let id = obj.get("id").cloned().unwrap_or(Value::Null);
    let method = obj
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| ControlError::new(codes::INVALID_REQUEST, "missing 'method'"))?;
    let params = obj.get("params").cloned().unwrap_or(Value::Null);
    let invalid = |e: &dyn std::fmt::Display| ControlError::new(codes::INVALID_PARAMS, e.to_string());

    let request = match method {
        "status" => NodeRequest::Status,
        "abci_query" => {
            let p: QueryParams = serde_json::from_value(params).map_err(|e| invalid(&e))?;
            let data = hex::decode(&p.data).map_err(|e| invalid(&format!("invalid hex data: {}", e)))?;
            NodeRequest::Query { path: p.path, data }
        }
        "broadcast_tx" => {
            let tx: SignedTx = serde_json::from_value(params).map_err(|e| invalid(&e))?;
            tx.validate().map_err(|e| invalid(&e))?;
            NodeRequest::Broadcast(tx)
        }
        other => {
            return Err(ControlError::new(
                codes::METHOD_NOT_FOUND,
                format!("unknown node method '{}'", other),
            ))
        }
    };
    Ok(NodeCall { id, request })
}

#[derive(Serialize)]
struct EventFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    topic: &'a Topic,
    payload: &'a Value,
}

/// An item queued in a connection's outbox.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Shared event; serialized per connection without copying the payload.
    Event(Arc<Event>),
    Reply(ServerMessage),
}

impl Outbound {
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        match self {
            Outbound::Event(event) => serde_json::to_string(&EventFrame {
                kind: "event",
                topic: &event.topic,
                payload: &event.payload,
            }),
            Outbound::Reply(msg) => serde_json::to_string(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_subscribe() {
        let msg = parse_control(r#"{"type":"subscribe","topic":"tx"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Subscribe(Topic::parse("tx").unwrap()));

        let msg = parse_control(r#"{"type":"unsubscribe","topic":"NewBlock"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Unsubscribe(t) if t.as_str() == "NewBlock"));
    }

    #[test]
    fn test_parse_errors_carry_codes() {
        assert_eq!(parse_control("{nope").unwrap_err().code, codes::PARSE_ERROR);
        assert_eq!(parse_control("[1]").unwrap_err().code, codes::INVALID_REQUEST);
        assert_eq!(
            parse_control(r#"{"type":"dance","topic":"tx"}"#).unwrap_err().code,
            codes::INVALID_REQUEST
        );
        assert_eq!(
            parse_control(r#"{"type":"subscribe"}"#).unwrap_err().code,
            codes::INVALID_PARAMS
        );
        assert_eq!(
            parse_control(r#"{"type":"subscribe","topic":""}"#).unwrap_err().code,
            codes::INVALID_PARAMS
        );
    }

    #[test]
    fn test_parse_node_calls() {
        let msg = parse_control(r#"{"type":"call","id":7,"method":"status"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Call(NodeCall {
                id: json!(7),
                request: NodeRequest::Status
            })
        );

        let msg = parse_control(
            r#"{"type":"call","id":"q","method":"abci_query","params":{"path":"/nonce","data":"0a0b"}}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            ClientMessage::Call(NodeCall { request: NodeRequest::Query { ref path, ref data }, .. })
                if path == "/nonce" && data == &vec![0x0a, 0x0b]
        ));

        let msg = parse_control(r#"{"type":"call","method":"status"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Call(NodeCall { id: Value::Null, .. })));
    }

    #[test]
    fn test_node_call_errors() {
        let code = |text: &str| parse_control(text).unwrap_err().code;

        assert_eq!(code(r#"{"type":"call","id":1}"#), codes::INVALID_REQUEST);
        assert_eq!(code(r#"{"type":"call","id":1,"method":"net_info"}"#), codes::METHOD_NOT_FOUND);
        assert_eq!(
            code(r#"{"type":"call","id":1,"method":"abci_query","params":{"path":"/x","data":"zz"}}"#),
            codes::INVALID_PARAMS
        );
        assert_eq!(
            code(r#"{"type":"call","id":1,"method":"broadcast_tx","params":{"tx":"no","signature":{"algo":"ed25519","pub_key":"aa","signature":"bb"}}}"#),
            codes::INVALID_PARAMS
        );
    }

    #[test]
    fn test_result_and_call_error_frames() {
        let text = Outbound::Reply(ServerMessage::Result {
            id: json!(1),
            result: json!({"height": 2}),
        })
        .to_text()
        .unwrap();
        assert_eq!(text, r#"{"type":"result","id":1,"result":{"height":2}}"#);

        let err = ControlError::new(codes::NODE_ERROR, "down");
        let v: Value = serde_json::from_str(
            &Outbound::Reply(ServerMessage::call_error(json!("a"), &err)).to_text().unwrap(),
        )
        .unwrap();
        assert_eq!(v, json!({"type": "error", "id": "a", "code": codes::NODE_ERROR, "message": "down"}));
    }

    #[test]
    fn test_event_frame_shape() {
        let event = Arc::new(Event::new(Topic::parse("tx").unwrap(), json!({"height": 3})));
        let text = Outbound::Event(event).to_text().unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v, json!({"type": "event", "topic": "tx", "payload": {"height": 3}}));

        let parsed: ServerMessage = serde_json::from_str(&text).unwrap();
        assert!(matches!(parsed, ServerMessage::Event { .. }));
    }

    #[test]
    fn test_reply_frames() {
        let text = Outbound::Reply(ServerMessage::Subscribed {
            topic: Topic::parse("tx").unwrap(),
        })
        .to_text()
        .unwrap();
        assert_eq!(text, r#"{"type":"subscribed","topic":"tx"}"#);

        let err = ControlError::new(codes::PARSE_ERROR, "bad");
        let text = Outbound::Reply(ServerMessage::error(&err)).to_text().unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["code"], codes::PARSE_ERROR);
    }
}
