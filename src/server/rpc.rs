//! Line-delimited JSON-RPC 2.0 over stdio.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

use super::{handle_method, SharedState, METHODS};
use crate::error::{AppError, ErrorCode};

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request identifier (None for notifications).
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    /// Request identifier (null when the request could not be parsed).
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    /// `{code, message, details}` body for service errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Map a service error onto a JSON-RPC error carrying the wire body.
    pub fn from_app_error(id: Option<Value>, err: &AppError) -> Self {
        let body = err.to_response();
        let code = match body.code {
            ErrorCode::ValidationError => -32602,
            ErrorCode::NotFound => -32004,
            ErrorCode::RateLimitExceeded => -32029,
            ErrorCode::ServiceUnavailable => -32003,
            ErrorCode::InternalError => -32603,
        };
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: body.message.clone(),
                data: serde_json::to_value(&body).ok(),
            }),
        }
    }
}

/// JSON-RPC server running over stdio.
pub struct RpcServer {
    state: SharedState,
}

impl RpcServer {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Serve stdin/stdout until EOF.
    pub async fn run(&self) -> std::io::Result<()> {
        info!("Claim analysis server starting...");
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.serve(stdin, stdout).await
    }

    /// Serve any line-oriented reader/writer pair until EOF.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            // EOF reached
            if bytes_read == 0 {
                info!("EOF received, shutting down");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            debug!(request = %trimmed, "Received request");

            let response = match serde_json::from_str::<JsonRpcRequest>(trimmed) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => {
                    error!(error = %e, "Failed to parse request");
                    Some(JsonRpcResponse::error(
                        None,
                        -32700,
                        format!("Parse error: {}", e),
                    ))
                }
            };

            // Notifications get no response
            if let Some(response) = response {
                let response_json = serde_json::to_string(&response)?;
                debug!(response = %response_json, "Sending response");

                writer.write_all(response_json.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }

        Ok(())
    }

    /// Handle a single request. Returns `None` for notifications.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let is_notification = request.id.is_none();

        if request.jsonrpc != "2.0" {
            return (!is_notification).then(|| {
                JsonRpcResponse::error(request.id, -32600, "Invalid Request: jsonrpc must be \"2.0\"")
            });
        }

        match request.method.as_str() {
            "initialize" => Some(JsonRpcResponse::success(
                request.id,
                json!({
                    "serverInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                    "methods": METHODS,
                }),
            )),
            "ping" => Some(JsonRpcResponse::success(
                request.id,
                Value::Object(Default::default()),
            )),
            method if METHODS.contains(&method) => {
                let result = handle_method(&self.state, method, request.params).await;
                if is_notification {
                    return None;
                }
                Some(match result {
                    Ok(value) => JsonRpcResponse::success(request.id, value),
                    Err(e) => {
                        error!(method = %method, error = %e, "Method failed");
                        JsonRpcResponse::from_app_error(request.id, &e)
                    }
                })
            }
            method => {
                if is_notification {
                    debug!(method = %method, "Unknown notification, ignoring");
                    None
                } else {
                    error!(method = %method, "Unknown method");
                    Some(JsonRpcResponse::error(
                        request.id,
                        -32601,
                        format!("Method not found: {}", method),
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    #[test]
    fn test_success_response_serialization() {
        let response = JsonRpcResponse::success(Some(json!(1)), json!({ "ok": true }));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 1);
        assert_eq!(json["result"]["ok"], true);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_error_response_has_null_id_without_request_id() {
        let response = JsonRpcResponse::error(None, -32700, "Parse error");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["id"], Value::Null);
        assert_eq!(json["error"]["code"], -32700);
    }

    #[test]
    fn test_app_error_mapping_hides_internal_details() {
        let err = AppError::Storage(StorageError::Query {
            message: "disk I/O error at /var/lib/db".to_string(),
        });
        let response = JsonRpcResponse::from_app_error(Some(json!("a")), &err);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["error"]["code"], -32603);
        assert_eq!(json["error"]["message"], "Internal error");
        assert_eq!(json["error"]["data"]["code"], "INTERNAL_ERROR");
        assert!(!json.to_string().contains("/var/lib/db"));
    }

    #[test]
    fn test_not_found_mapping() {
        let err = AppError::ReportNotFound {
            claim_id: "c-1".to_string(),
        };
        let response = JsonRpcResponse::from_app_error(Some(json!(2)), &err);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["error"]["code"], -32004);
        assert_eq!(json["error"]["data"]["code"], "NOT_FOUND");
    }
}
