use crate::dispatch::{tool_listing, Dispatcher};
use crate::error::CrewError;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::warn;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Map<String, Value>>,
}

#[must_use]
pub fn success(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

#[must_use]
pub fn error(id: Value, code: i64, message: &str, kind: Option<&str>) -> Value {
    let mut err = json!({ "code": code, "message": message });
    if let (Some(kind), Some(obj)) = (kind, err.as_object_mut()) {
        obj.insert("data".to_string(), json!({ "kind": kind }));
    }
    json!({ "jsonrpc": "2.0", "id": id, "error": err })
}

fn error_from(id: Value, err: &CrewError) -> Value {
    error(id, err.rpc_code(), &err.sanitized_message(), Some(err.code()))
}

/// Wraps a tool result payload in the MCP content envelope: the payload is
/// JSON-encoded into a single text block.
fn tool_result(payload: &Value) -> Value {
    json!({
        "content": [ { "type": "text", "text": payload.to_string() } ]
    })
}

/// Handles one decoded JSON-RPC request. Returns `None` for notifications
/// (requests without an id), which produce no response frame.
pub async fn handle_request(
    dispatcher: &Dispatcher,
    credential: Option<&str>,
    request: JsonRpcRequest,
) -> Option<Value> {
    let id = request.id.clone()?;

    let response = match request.method.as_str() {
        "initialize" => success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {
                    "name": "crewd",
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "capabilities": { "tools": {} },
            }),
        ),
        "ping" => success(id, json!({})),
        "tools/list" => success(id, tool_listing()),
        "tools/call" => {
            let params: ToolCallParams = match request
                .params
                .map(serde_json::from_value)
                .transpose()
            {
                Ok(Some(params)) => params,
                Ok(None) => {
                    return Some(error(id, -32602, "params required for tools/call", None))
                }
                Err(err) => {
                    return Some(error(id, -32602, &format!("invalid params: {err}"), None))
                }
            };
            let args = params.arguments.unwrap_or_default();
            match dispatcher.dispatch(credential, &params.name, args).await {
                Ok(payload) => success(id, tool_result(&payload)),
                Err(err) => {
                    warn!(tool = %params.name, code = err.code(), "tool call failed");
                    error_from(id, &err)
                }
            }
        }
        other => error(id, -32601, &format!("method not found: {other}"), None),
    };
    Some(response)
}

/// Parses a raw frame and handles it; malformed JSON yields a parse-error
/// response with a null id.
pub async fn handle_frame(
    dispatcher: &Dispatcher,
    credential: Option<&str>,
    raw: &str,
) -> Option<Value> {
    match serde_json::from_str::<JsonRpcRequest>(raw) {
        Ok(request) => handle_request(dispatcher, credential, request).await,
        Err(err) => Some(error(
            Value::Null,
            -32700,
            &format!("parse error: {err}"),
            None,
        )),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

    use super::{error, success};
    use serde_json::json;

    #[test]
    fn envelopes_carry_the_request_id() {
        let ok = success(json!(7), json!({"x": 1}));
        assert_eq!(ok["id"], json!(7));
        assert_eq!(ok["jsonrpc"], json!("2.0"));

        let failed = error(json!("abc"), -32004, "not found", Some("NOT_FOUND"));
        assert_eq!(failed["id"], json!("abc"));
        assert_eq!(failed["error"]["code"], json!(-32004));
        assert_eq!(failed["error"]["data"]["kind"], json!("NOT_FOUND"));
    }
}
