use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// The only RPC method any service accepts.
pub const TASKS_SEND: &str = "tasks/send";

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 / A2A envelope types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    pub params: TaskParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    #[serde(rename = "type")]
    pub part_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<PartText>,
}

/// A text part's payload is either a bare string or `{"raw": "..."}`;
/// both map to the same content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PartText {
    Plain(String),
    Wrapped { raw: String },
}

impl PartText {
    pub fn raw(&self) -> &str {
        match self {
            PartText::Plain(s) => s,
            PartText::Wrapped { raw } => raw,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<A2aResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct A2aResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(
        rename = "sessionId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<String>,
    pub status: TaskStatus,
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub parts: Vec<Part>,
    pub index: u32,
    pub append: bool,
    #[serde(rename = "lastChunk")]
    pub last_chunk: bool,
}

// ---------------------------------------------------------------------------
// Envelope operations
// ---------------------------------------------------------------------------

/// Pull the first text part's content out of a message.
pub fn extract_text(message: &Message) -> Result<String> {
    for part in &message.parts {
        if part.part_type == "text"
            && let Some(text) = &part.text
        {
            return Ok(text.raw().to_string());
        }
    }
    Err(Error::Protocol(
        "No text content found in message parts".to_string(),
    ))
}

/// Validate an incoming request. Returns the ready-to-send error response
/// when invalid, `None` when the request may proceed.
pub fn validate(req: &RpcRequest) -> Option<RpcResponse> {
    if req.method != TASKS_SEND {
        return Some(error_response(&req.id, METHOD_NOT_FOUND, "Method not found"));
    }

    let Some(message) = &req.params.message else {
        return Some(error_response(
            &req.id,
            INVALID_PARAMS,
            "Missing 'message' parameter",
        ));
    };

    if let Err(e) = extract_text(message) {
        return Some(error_response(
            &req.id,
            INVALID_PARAMS,
            format!("Invalid message format: {e}"),
        ));
    }

    None
}

/// Wrap output text as a completed single-artifact A2A response.
pub fn a2a_response(
    request_id: &str,
    task_id: Option<String>,
    output_text: String,
    session_id: Option<String>,
    metadata: Value,
) -> RpcResponse {
    let artifact = Artifact {
        parts: vec![Part {
            part_type: "text".to_string(),
            text: Some(PartText::Wrapped { raw: output_text }),
        }],
        index: 0,
        append: false,
        last_chunk: true,
    };

    RpcResponse {
        jsonrpc: "2.0".to_string(),
        id: request_id.to_string(),
        result: Some(A2aResult {
            id: task_id,
            session_id,
            status: TaskStatus {
                state: "completed".to_string(),
            },
            artifacts: vec![artifact],
            metadata,
        }),
        error: None,
    }
}

pub fn error_response(request_id: &str, code: i64, message: impl Into<String>) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0".to_string(),
        id: request_id.to_string(),
        result: None,
        error: Some(RpcError {
            code,
            message: message.into(),
        }),
    }
}

/// Read back the text payload from a result's first artifact.
pub fn artifact_text(result: &A2aResult) -> Result<&str> {
    result
        .artifacts
        .first()
        .and_then(|artifact| artifact.parts.first())
        .and_then(|part| part.text.as_ref())
        .map(PartText::raw)
        .ok_or_else(|| Error::Protocol("result has no text artifact".to_string()))
}

// ---------------------------------------------------------------------------
// Agent card
// ---------------------------------------------------------------------------

/// Self-description served at `/.well-known/agent.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    pub version: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
    pub agent_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSkill {
    pub name: String,
    pub description: String,
}

/// Card file states the discovery endpoint must distinguish:
/// missing → 404, unparseable → 500, otherwise the raw JSON is served.
#[derive(Debug)]
pub enum CardFile {
    Loaded(Value),
    Missing,
    Malformed,
}

pub fn load_card(path: &Path) -> CardFile {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return CardFile::Missing,
    };
    match serde_json::from_str::<Value>(&content) {
        Ok(value) => CardFile::Loaded(value),
        Err(_) => CardFile::Malformed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_request(method: &str, parts: Vec<Part>) -> RpcRequest {
        RpcRequest {
            jsonrpc: "2.0".to_string(),
            id: "req-1".to_string(),
            method: method.to_string(),
            params: TaskParams {
                id: Some("task-1".to_string()),
                message: Some(Message {
                    role: Some("user".to_string()),
                    parts,
                }),
                metadata: Value::Null,
            },
        }
    }

    fn plain_part(text: &str) -> Part {
        Part {
            part_type: "text".to_string(),
            text: Some(PartText::Plain(text.to_string())),
        }
    }

    #[test]
    fn test_validate_accepts_tasks_send() {
        let req = text_request(TASKS_SEND, vec![plain_part("hello")]);
        assert!(validate(&req).is_none());
    }

    #[test]
    fn test_validate_rejects_unknown_method() {
        let req = text_request("foo", vec![plain_part("hello")]);
        let resp = validate(&req).unwrap();
        let error = resp.error.unwrap();
        assert_eq!(error.code, METHOD_NOT_FOUND);
        assert_eq!(resp.id, "req-1");
    }

    #[test]
    fn test_validate_rejects_missing_message() {
        let req = RpcRequest {
            jsonrpc: "2.0".to_string(),
            id: "req-2".to_string(),
            method: TASKS_SEND.to_string(),
            params: TaskParams {
                id: None,
                message: None,
                metadata: Value::Null,
            },
        };
        let resp = validate(&req).unwrap();
        assert_eq!(resp.error.unwrap().code, INVALID_PARAMS);
    }

    #[test]
    fn test_validate_rejects_empty_parts() {
        let req = text_request(TASKS_SEND, vec![]);
        let resp = validate(&req).unwrap();
        let error = resp.error.unwrap();
        assert_eq!(error.code, INVALID_PARAMS);
        assert!(error.message.contains("Invalid message format"));
    }

    #[test]
    fn test_validate_rejects_non_text_parts_only() {
        let req = text_request(
            TASKS_SEND,
            vec![Part {
                part_type: "image".to_string(),
                text: None,
            }],
        );
        assert!(validate(&req).is_some());
    }

    #[test]
    fn test_extract_text_plain_and_wrapped() {
        let plain = Message {
            role: None,
            parts: vec![plain_part("raw string")],
        };
        assert_eq!(extract_text(&plain).unwrap(), "raw string");

        let wrapped = Message {
            role: None,
            parts: vec![Part {
                part_type: "text".to_string(),
                text: Some(PartText::Wrapped {
                    raw: "wrapped string".to_string(),
                }),
            }],
        };
        assert_eq!(extract_text(&wrapped).unwrap(), "wrapped string");
    }

    #[test]
    fn test_extract_text_takes_first_text_part() {
        let message = Message {
            role: None,
            parts: vec![
                Part {
                    part_type: "image".to_string(),
                    text: None,
                },
                plain_part("first"),
                plain_part("second"),
            ],
        };
        assert_eq!(extract_text(&message).unwrap(), "first");
    }

    #[test]
    fn test_a2a_response_shape() {
        let resp = a2a_response(
            "req-9",
            Some("task-9".to_string()),
            "payload".to_string(),
            Some("session-9".to_string()),
            serde_json::json!({"agent_type": "quality"}),
        );
        assert_eq!(resp.jsonrpc, "2.0");
        assert_eq!(resp.id, "req-9");
        assert!(resp.error.is_none());

        let result = resp.result.unwrap();
        assert_eq!(result.status.state, "completed");
        assert_eq!(result.artifacts.len(), 1);
        let artifact = &result.artifacts[0];
        assert_eq!(artifact.index, 0);
        assert!(!artifact.append);
        assert!(artifact.last_chunk);
    }

    // Envelope idempotency: what goes into a response comes back out of
    // artifact extraction verbatim, including through a wire roundtrip.
    #[test]
    fn test_envelope_roundtrip_preserves_text() {
        let payload = "{\"sentiment\": \"positive\"}";
        let resp = a2a_response("r", Some("t".into()), payload.to_string(), None, Value::Null);
        let wire = serde_json::to_string(&resp).unwrap();
        let back: RpcResponse = serde_json::from_str(&wire).unwrap();
        assert_eq!(artifact_text(&back.result.unwrap()).unwrap(), payload);
    }

    #[test]
    fn test_wire_field_names() {
        let resp = a2a_response(
            "r",
            Some("t".into()),
            "x".to_string(),
            Some("s".into()),
            Value::Null,
        );
        let wire = serde_json::to_value(&resp).unwrap();
        assert_eq!(wire["result"]["sessionId"], "s");
        assert_eq!(wire["result"]["artifacts"][0]["lastChunk"], true);
        assert_eq!(wire["result"]["artifacts"][0]["parts"][0]["type"], "text");
        assert_eq!(
            wire["result"]["artifacts"][0]["parts"][0]["text"]["raw"],
            "x"
        );
    }

    #[test]
    fn test_error_response_shape() {
        let resp = error_response("req-3", METHOD_NOT_FOUND, "Method not found");
        assert!(resp.result.is_none());
        let error = resp.error.unwrap();
        assert_eq!(error.code, -32601);
        assert_eq!(error.message, "Method not found");
    }

    #[test]
    fn test_request_parses_without_metadata() {
        let raw = r#"{
            "jsonrpc": "2.0",
            "id": "abc",
            "method": "tasks/send",
            "params": {
                "id": "abc",
                "message": {"role": "user", "parts": [{"type": "text", "text": "hi"}]}
            }
        }"#;
        let req: RpcRequest = serde_json::from_str(raw).unwrap();
        assert!(req.params.metadata.is_null());
        assert!(validate(&req).is_none());
    }

    #[test]
    fn test_artifact_text_missing() {
        let result = A2aResult {
            id: None,
            session_id: None,
            status: TaskStatus {
                state: "completed".to_string(),
            },
            artifacts: vec![],
            metadata: Value::Null,
        };
        assert!(artifact_text(&result).is_err());
    }

    #[test]
    fn test_load_card_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        assert!(matches!(load_card(&path), CardFile::Missing));
    }

    #[test]
    fn test_load_card_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_card(&path), CardFile::Malformed));
    }

    #[test]
    fn test_load_card_ok() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quality.json");
        std::fs::write(
            &path,
            r#"{"name": "Quality Agent", "agent_type": "quality"}"#,
        )
        .unwrap();
        match load_card(&path) {
            CardFile::Loaded(value) => assert_eq!(value["agent_type"], "quality"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
