use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound RPC call from a connected client.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Option<Value>,
    pub id: Option<Value>,
}

/// Response to an [`RpcRequest`].
///
/// Wire format: `{ id, success, result?, error?: { code: String, message } }`
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub id: Option<Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
}

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const NOT_FOUND: i32 = -32001;

pub fn error_code_to_string(code: i32) -> &'static str {
    match code {
        PARSE_ERROR => "PARSE_ERROR",
        INVALID_REQUEST => "INVALID_REQUEST",
        METHOD_NOT_FOUND => "METHOD_NOT_FOUND",
        INVALID_PARAMS => "INVALID_PARAMS",
        INTERNAL_ERROR => "INTERNAL_ERROR",
        NOT_FOUND => "NOT_FOUND",
        _ => "UNKNOWN_ERROR",
    }
}

/// Handler-level failure. The message is shown to the client as is, so it
/// never carries internal detail.
#[derive(Debug, thiserror::Error)]
pub enum RpcFailure {
    #[error("{0}")]
    InvalidParams(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl RpcFailure {
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidParams(_) => INVALID_PARAMS,
            Self::NotFound(_) => NOT_FOUND,
            Self::Internal(_) => INTERNAL_ERROR,
        }
    }
}

impl RpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(RpcError {
                code: error_code_to_string(code).to_string(),
                message: message.into(),
            }),
        }
    }

    pub fn from_result(id: Option<Value>, result: Result<Value, RpcFailure>) -> Self {
        match result {
            Ok(value) => Self::success(id, value),
            Err(failure) => Self::error(id, failure.code(), failure.to_string()),
        }
    }

    pub fn method_not_found(id: Option<Value>, method: &str) -> Self {
        Self::error(id, METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn parse_error() -> Self {
        Self::error(None, PARSE_ERROR, "Parse error")
    }
}

/// Decode the params object into a typed request. Missing params decode as
/// an empty object so all-optional structs still work.
pub fn parse_params<T: DeserializeOwned>(params: &Value) -> Result<T, RpcFailure> {
    let decoded = if params.is_null() {
        T::deserialize(Value::Object(Default::default()))
    } else {
        T::deserialize(params)
    };
    decoded.map_err(|e| RpcFailure::InvalidParams(format!("Invalid parameters: {e}")))
}

/// Extract a required, non-blank string param.
pub fn require_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, RpcFailure> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| RpcFailure::InvalidParams(format!("Missing required parameter: {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_rpc_request() {
        let raw = r#"{"method":"chat.send","params":{"conversationId":"conv_1","message":"oi"},"id":1}"#;
        let req: RpcRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.method, "chat.send");
        assert!(req.params.is_some());
        assert_eq!(req.id, Some(json!(1)));
    }

    #[test]
    fn success_response_omits_error() {
        let resp = RpcResponse::success(Some(json!(1)), json!({"ok": true}));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["success"], true);
        assert!(value["result"].is_object());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn failure_maps_to_string_code() {
        let resp = RpcResponse::from_result(Some(json!(7)), Err(RpcFailure::NotFound("Meta não encontrada".into())));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "NOT_FOUND");
        assert_eq!(value["error"]["message"], "Meta não encontrada");
        assert!(value.get("result").is_none());
    }

    #[test]
    fn error_codes() {
        assert_eq!(error_code_to_string(PARSE_ERROR), "PARSE_ERROR");
        assert_eq!(error_code_to_string(INVALID_PARAMS), "INVALID_PARAMS");
        assert_eq!(error_code_to_string(INVALID_REQUEST), "INVALID_REQUEST");
        assert_eq!(error_code_to_string(-99999), "UNKNOWN_ERROR");
    }

    #[test]
    fn method_not_found_names_method() {
        let json = serde_json::to_string(&RpcResponse::method_not_found(None, "foo.bar")).unwrap();
        assert!(json.contains("METHOD_NOT_FOUND"));
        assert!(json.contains("foo.bar"));
    }

    #[test]
    fn require_str_rejects_blank() {
        let params = json!({"title": "ok", "blank": "  ", "count": 5});
        assert_eq!(require_str(&params, "title").unwrap(), "ok");
        assert!(require_str(&params, "blank").is_err());
        assert!(require_str(&params, "count").is_err());
        assert!(require_str(&params, "missing").is_err());
    }

    #[derive(Debug, Deserialize)]
    struct Sample {
        #[serde(default)]
        status: Option<String>,
    }

    #[test]
    fn parse_params_accepts_null() {
        let sample: Sample = parse_params(&Value::Null).unwrap();
        assert!(sample.status.is_none());
        assert!(parse_params::<Sample>(&json!({"status": 3})).is_err());
    }

    #[test]
    fn parse_error_has_no_id() {
        let resp = RpcResponse::parse_error();
        assert!(resp.id.is_none());
        assert_eq!(resp.error.as_ref().unwrap().code, "PARSE_ERROR");
    }
}
