//! JSON-RPC server over Unix socket.
//!
//! Listens on a Unix domain socket, accepts connections, and dispatches
//! newline-delimited JSON-RPC method calls to the command handlers.

use std::path::PathBuf;
use std::sync::Arc;

use portal_enroll::EnrollError;
use portal_types::api::ErrorKind;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tracing::{debug, error, info, warn};

use crate::commands;
use crate::DaemonState;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    pub id: serde_json::Value,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcError {
    pub code: i32,
    /// Upper-snake error name.
    pub message: String,
    /// Optional structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcError {
    // Standard JSON-RPC errors

    /// Parse error (-32700).
    pub fn parse_error() -> Self {
        Self {
            code: -32700,
            message: "PARSE_ERROR".to_string(),
            data: None,
        }
    }

    /// Invalid request (-32600).
    pub fn invalid_request() -> Self {
        Self {
            code: -32600,
            message: "INVALID_REQUEST".to_string(),
            data: None,
        }
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: "METHOD_NOT_FOUND".to_string(),
            data: Some(serde_json::json!({"method": method})),
        }
    }

    /// Invalid params (-32602).
    pub fn invalid_params(detail: &str) -> Self {
        Self {
            code: -32602,
            message: "INVALID_PARAMS".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    /// Internal error (-32603).
    pub fn internal_error(detail: &str) -> Self {
        Self {
            code: -32603,
            message: "INTERNAL_ERROR".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    /// Map a domain error. Internal failures are logged here in full and
    /// reach the client without detail.
    pub fn from_enroll(err: &EnrollError) -> Self {
        if err.is_internal() {
            error!(error = %err, "Request failed");
        } else {
            debug!(error = %err, "Request rejected");
        }
        let kind = err.kind();
        let body = err.to_api_error();
        Self {
            code: domain_code(kind),
            message: kind.as_str().to_uppercase(),
            data: serde_json::to_value(&body).ok(),
        }
    }
}

/// Stable code per error kind.
pub fn domain_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::NotFound => -32101,
        ErrorKind::Unavailable => -32102,
        ErrorKind::OutOfWindow => -32103,
        ErrorKind::InvalidInput => -32104,
        ErrorKind::DuplicateEmail => -32110,
        ErrorKind::DuplicateNationalId => -32111,
        ErrorKind::AlreadyEnrolled => -32112,
        ErrorKind::TokenNotFound => -32120,
        ErrorKind::TokenAlreadyUsed => -32121,
        ErrorKind::TokenExpired => -32122,
        ErrorKind::RateLimited => -32123,
        ErrorKind::NotifierError => -32129,
        ErrorKind::StorageError => -32130,
    }
}

/// The RPC server.
pub struct RpcServer {
    state: Arc<DaemonState>,
    socket_path: PathBuf,
}

impl RpcServer {
    /// Create a new RPC server.
    pub fn new(state: Arc<DaemonState>, socket_path: PathBuf) -> Self {
        Self { state, socket_path }
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) -> anyhow::Result<()> {
        // Remove stale socket file
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            warn!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Handle a single client connection.
async fn handle_connection(
    state: Arc<DaemonState>,
    stream: tokio::net::UnixStream,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break; // EOF
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => dispatch_request(state.clone(), request).await,
            Err(_) => RpcResponse::error(serde_json::Value::Null, RpcError::parse_error()),
        };

        let mut response_json = serde_json::to_string(&response)?;
        response_json.push('\n');
        writer.write_all(response_json.as_bytes()).await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Dispatch a JSON-RPC request to the appropriate command handler.
pub async fn dispatch_request(state: Arc<DaemonState>, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    if request.jsonrpc != "2.0" {
        return RpcResponse::error(id, RpcError::invalid_request());
    }
    let method = request.method.as_str();

    debug!("Dispatching RPC method: {}", method);

    let result = match method {
        // Enrollment boundary
        "enroll" => commands::enrollment::enroll(&state, &request.params).await,
        "confirm" => commands::enrollment::confirm(&state, &request.params).await,
        "status" => commands::enrollment::status(&state, &request.params).await,
        "resend" => commands::enrollment::resend(&state, &request.params).await,
        "request_email_change" => {
            commands::enrollment::request_email_change(&state, &request.params).await
        }
        "request_recovery" => commands::enrollment::request_recovery(&state, &request.params).await,

        // Maintenance
        "sweep_tokens" => commands::maintenance::sweep_tokens(&state).await,
        "create_training" => commands::maintenance::create_training(&state, &request.params).await,
        "set_training_active" => {
            commands::maintenance::set_training_active(&state, &request.params).await
        }
        "ping" => commands::maintenance::ping(&state).await,

        _ => Err(RpcError::method_not_found(method)),
    };

    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(err) => RpcResponse::error(id, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_db::DbError;

    #[test]
    fn test_domain_error_codes() {
        let err = RpcError::from_enroll(&EnrollError::TokenExpired);
        assert_eq!(err.code, -32122);
        assert_eq!(err.message, "TOKEN_EXPIRED");

        let err = RpcError::from_enroll(&EnrollError::DuplicateEmail {
            email: "a@example.org".into(),
        });
        assert_eq!(err.code, -32110);
        let data = err.data.expect("data");
        assert_eq!(data["kind"], "duplicate_email");
        assert_eq!(data["field"], "email");

        let err = RpcError::method_not_found("unknown");
        assert_eq!(err.code, -32601);
    }

    #[test]
    fn test_storage_error_is_opaque() {
        let err = RpcError::from_enroll(&EnrollError::Storage(DbError::Migration(
            "secret detail".into(),
        )));
        assert_eq!(err.code, -32130);
        assert_eq!(err.message, "STORAGE_ERROR");
        let data = err.data.expect("data");
        assert!(!data.to_string().contains("secret detail"));
    }

    #[test]
    fn test_rpc_response_success() {
        let resp = RpcResponse::success(serde_json::json!(1), serde_json::json!({"pong": true}));
        assert!(resp.result.is_some());
        assert!(resp.error.is_none());
    }

    #[test]
    fn test_rpc_response_error() {
        let resp = RpcResponse::error(serde_json::json!(1), RpcError::internal_error("test"));
        assert!(resp.result.is_none());
        assert!(resp.error.is_some());
    }
}
