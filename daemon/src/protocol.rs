use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeError;

/// JSON-RPC request from client
#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// JSON-RPC response. `result` is always present, `error` only on failure.
#[derive(Debug, Serialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    pub result: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Value,
}

/// Error details
#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

// Error codes
pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const AGENT_BUSY: i64 = -32001;
pub const AGENT_NOT_INITIALIZED: i64 = -32002;

// Method names
pub const METHOD_LIST_FILES: &str = "list_files";
pub const METHOD_ADD_FILES: &str = "add_files";
pub const METHOD_READ_FILES: &str = "read_files";
pub const METHOD_DROP: &str = "drop";
pub const METHOD_EXCHANGE_FILES: &str = "exchange_files";
pub const METHOD_CLEAR: &str = "clear";
pub const METHOD_RESET: &str = "reset";
pub const METHOD_LOAD: &str = "load";
pub const METHOD_SAVE: &str = "save";
pub const METHOD_FIX_DIAGNOSTIC: &str = "fix_diagnostic";
pub const METHOD_GET_OUTPUT_HISTORY: &str = "get_output_history";
pub const METHOD_CHAT_HISTORY: &str = "chat_history";
pub const METHOD_GET_HISTORY: &str = "get_history";
pub const METHOD_GET_ANNOUNCEMENTS: &str = "get_announcements";
pub const METHOD_GET_CODER_INFO: &str = "get_coder_info";
pub const METHOD_LIST_MODELS: &str = "list_models";
pub const METHOD_RUN_COMMAND: &str = "run_command";
pub const METHOD_NOTIFY: &str = "notify";
pub const METHOD_EXIT: &str = "exit";

// --- Request params ---

/// A single path or a list of paths
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum FilePathsParams {
    One(String),
    Many(Vec<String>),
}

impl FilePathsParams {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            FilePathsParams::One(path) => vec![path],
            FilePathsParams::Many(paths) => paths,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct OutputHistoryParams {
    #[serde(default)]
    pub start_index: Option<i64>,
    #[serde(default)]
    pub end_index: Option<i64>,
}

// --- Response types ---

#[derive(Debug, Serialize)]
pub struct FileListResult {
    pub added: Vec<String>,
    pub readonly: Vec<String>,
}

/// Outcome of a file-set request: applied now, or parked until the agent is idle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Queued,
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelAlias {
    pub alias_name: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatInputEntry {
    pub cmd: String,
    pub content: String,
}

// --- Helpers ---

impl Response {
    pub fn success<T: Serialize>(id: Value, result: T) -> Self {
        Self {
            jsonrpc: "2.0",
            result: serde_json::to_value(result).unwrap_or(Value::Null),
            error: None,
            id,
        }
    }

    pub fn failure(id: Value, err: &BridgeError) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Value::Null,
            error: Some(RpcError {
                code: err.code(),
                message: err.to_string(),
            }),
            id,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Compact JSON encoding. Never contains a raw CR or LF.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"jsonrpc":"2.0","result":null,"error":{{"code":{INTERNAL_ERROR},"message":"failed to encode response: {}"}},"id":null}}"#,
                e.to_string().replace('"', "'")
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{FilePathsParams, Request, RequestStatus, Response, METHOD_NOT_FOUND};
    use crate::error::BridgeError;
    use serde_json::json;

    #[test]
    fn request_defaults_params_and_id_to_null() {
        let request: Request =
            serde_json::from_str(r#"{"method":"list_files"}"#).expect("request to parse");
        assert_eq!(request.method, "list_files");
        assert_eq!(request.params, json!(null));
        assert_eq!(request.id, json!(null));
    }

    #[test]
    fn request_keeps_string_ids() {
        let request: Request = serde_json::from_str(r#"{"id":"abc","method":"notify"}"#)
            .expect("request to parse");
        assert_eq!(request.id, json!("abc"));
    }

    #[test]
    fn success_response_omits_error() {
        let response = Response::success(json!(2), json!({"ok": true}));
        let value = serde_json::to_value(response).expect("response to serialize");
        assert_eq!(value.get("id"), Some(&json!(2)));
        assert_eq!(value.get("jsonrpc"), Some(&json!("2.0")));
        assert_eq!(value.get("result"), Some(&json!({"ok": true})));
        assert!(value.get("error").is_none());
    }

    #[test]
    fn failure_response_carries_code_and_null_result() {
        let err = BridgeError::MethodNotFound("bogus".into());
        let response = Response::failure(json!(3), &err);
        assert!(response.is_error());
        let value = serde_json::to_value(response).expect("error to serialize");
        assert_eq!(value.get("result"), Some(&json!(null)));
        let error = value.get("error").expect("error field");
        assert_eq!(error.get("code"), Some(&json!(METHOD_NOT_FOUND)));
        assert_eq!(error.get("message"), Some(&json!("unknown method: bogus")));
    }

    #[test]
    fn file_params_accept_single_path() {
        let one: FilePathsParams = serde_json::from_value(json!("a.py")).expect("single path");
        assert_eq!(one.into_vec(), vec!["a.py".to_string()]);

        let many: FilePathsParams =
            serde_json::from_value(json!(["a.py", "b.py"])).expect("path list");
        assert_eq!(many.into_vec().len(), 2);
    }

    #[test]
    fn request_status_serializes_snake_case() {
        assert_eq!(serde_json::to_value(RequestStatus::Queued).unwrap(), json!("queued"));
        assert_eq!(serde_json::to_value(RequestStatus::Success).unwrap(), json!("success"));
    }

    #[test]
    fn encoded_response_has_no_raw_newlines() {
        let response = Response::success(json!(1), json!(["line one\r\n\r\nline two"]));
        let encoded = response.to_json();
        assert!(!encoded.contains('\n'));
        assert!(!encoded.contains('\r'));
    }
}
