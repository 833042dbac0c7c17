//! Method dispatch table and request/response framing (spec §4.I).
//! Grounded on the teacher's `jsonrpc_register`/`jsonrpc_handler` pair
//! (`io-engine/src/jsonrpc.rs`), reworked from an SPDK C-callback registry
//! into a plain synchronous `HashMap` dispatch since the vhost-user/NBD
//! transport socket that would drive it asynchronously is out of scope.

use std::collections::HashMap;

use serde_json::Value;

use super::error::{Code, RpcError};

pub type Handler = Box<dyn Fn(Option<Value>) -> Result<Value, RpcError> + Send + Sync>;

/// Registered method table. One process-wide instance owns every bdev/nvmf
/// RPC method named in spec §6.
#[derive(Default)]
pub struct Dispatcher {
    methods: HashMap<String, Handler>,
}

fn success_response(id: Value, result: Value) -> Value {
    serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn error_response(id: Value, err: &RpcError) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": err.json_code(), "message": err.message},
    })
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(Option<Value>) -> Result<Value, RpcError> + Send + Sync + 'static,
    {
        self.methods.insert(name.to_string(), Box::new(handler));
    }

    /// Dispatch one already-decoded request or notification object.
    /// Returns `None` when the object was a notification (no `id`): the
    /// handler still runs, but no response is produced (spec §4.I).
    fn process_one(&self, req: &Value) -> Option<Value> {
        let has_id = req.get("id").is_some();
        let id = req.get("id").cloned().unwrap_or(Value::Null);

        if req.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return has_id.then(|| {
                error_response(id.clone(), &RpcError::new(Code::InvalidRequest, "missing or wrong 'jsonrpc' version"))
            });
        }

        let method = match req.get("method").and_then(Value::as_str) {
            Some(m) => m,
            None => {
                return has_id.then(|| {
                    error_response(id.clone(), &RpcError::new(Code::InvalidRequest, "missing 'method'"))
                })
            }
        };

        let params = req.get("params").cloned();
        let result = match self.methods.get(method) {
            Some(handler) => handler(params),
            None => Err(RpcError::new(Code::MethodNotFound, format!("method '{method}' not found"))),
        };

        if !has_id {
            return None;
        }
        Some(match result {
            Ok(value) => success_response(id, value),
            Err(err) => error_response(id, &err),
        })
    }

    /// Dispatch one complete top-level JSON-RPC frame (object or batch
    /// array) and return the serialized response bytes, if any.
    pub fn dispatch_bytes(&self, frame: &[u8]) -> Option<Vec<u8>> {
        let value: Value = match serde_json::from_slice(frame) {
            Ok(v) => v,
            Err(e) => {
                let resp = error_response(Value::Null, &RpcError::new(Code::ParseError, e.to_string()));
                return Some(serde_json::to_vec(&resp).expect("response is always serializable"));
            }
        };

        let response = match &value {
            Value::Array(items) => {
                if items.is_empty() {
                    Some(error_response(Value::Null, &RpcError::new(Code::InvalidRequest, "empty batch")))
                } else {
                    let responses: Vec<Value> = items.iter().filter_map(|item| self.process_one(item)).collect();
                    if responses.is_empty() {
                        None
                    } else {
                        Some(Value::Array(responses))
                    }
                }
            }
            Value::Object(_) => self.process_one(&value),
            _ => Some(error_response(
                Value::Null,
                &RpcError::new(Code::InvalidRequest, "top-level value must be an object or array"),
            )),
        };

        response.map(|r| serde_json::to_vec(&r).expect("response is always serializable"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ping_dispatcher() -> Dispatcher {
        let mut d = Dispatcher::new();
        d.register("ping", |_params| Ok(json!("pong")));
        d
    }

    #[test]
    fn batch_of_two_returns_array_of_two_results_with_matching_ids() {
        let d = ping_dispatcher();
        let frame = br#"[{"jsonrpc":"2.0","method":"ping","id":1},{"jsonrpc":"2.0","method":"ping","id":2}]"#;
        let resp: Value = serde_json::from_slice(&d.dispatch_bytes(frame).unwrap()).unwrap();
        let arr = resp.as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[0]["id"], json!(1));
        assert_eq!(arr[1]["id"], json!(2));
        assert_eq!(arr[0]["result"], json!("pong"));
    }

    #[test]
    fn empty_batch_is_invalid_request() {
        let d = ping_dispatcher();
        let resp: Value = serde_json::from_slice(&d.dispatch_bytes(b"[]").unwrap()).unwrap();
        assert_eq!(resp["error"]["code"], json!(-32600));
    }

    #[test]
    fn notification_without_id_produces_no_response() {
        let d = ping_dispatcher();
        let frame = br#"{"jsonrpc":"2.0","method":"ping"}"#;
        assert!(d.dispatch_bytes(frame).is_none());
    }

    #[test]
    fn unknown_method_is_method_not_found() {
        let d = ping_dispatcher();
        let frame = br#"{"jsonrpc":"2.0","method":"nope","id":1}"#;
        let resp: Value = serde_json::from_slice(&d.dispatch_bytes(frame).unwrap()).unwrap();
        assert_eq!(resp["error"]["code"], json!(-32601));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let d = ping_dispatcher();
        let resp: Value = serde_json::from_slice(&d.dispatch_bytes(b"{not json}").unwrap()).unwrap();
        assert_eq!(resp["error"]["code"], json!(-32700));
        assert_eq!(resp["id"], Value::Null);
    }

    #[test]
    fn handler_error_is_surfaced_with_its_code() {
        let mut d = Dispatcher::new();
        d.register("fail", |_| Err(RpcError::new(Code::InvalidParams, "bad args")));
        let frame = br#"{"jsonrpc":"2.0","method":"fail","id":7}"#;
        let resp: Value = serde_json::from_slice(&d.dispatch_bytes(frame).unwrap()).unwrap();
        assert_eq!(resp["error"]["code"], json!(-32602));
        assert_eq!(resp["error"]["message"], json!("bad args"));
    }
}
