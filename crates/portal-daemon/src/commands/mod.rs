//! IPC command handlers.
//!
//! Each submodule implements the commands for one IPC category. The core
//! is blocking, so every call into it runs on the blocking pool.

pub mod enrollment;
pub mod maintenance;

use std::sync::Arc;

use portal_enroll::Portal;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::rpc::RpcError;
use crate::DaemonState;

/// Run `f` against the portal on the blocking pool.
pub(crate) async fn with_portal<T, F>(state: &Arc<DaemonState>, f: F) -> Result<T, RpcError>
where
    F: FnOnce(&Portal) -> portal_enroll::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let portal = state.portal.clone();
    tokio::task::spawn_blocking(move || f(&portal))
        .await
        .map_err(|e| RpcError::internal_error(&format!("task failed: {e}")))?
        .map_err(|e| RpcError::from_enroll(&e))
}

pub(crate) fn parse_params<T: DeserializeOwned>(params: &Value) -> Result<T, RpcError> {
    serde_json::from_value(params.clone()).map_err(|e| RpcError::invalid_params(&e.to_string()))
}

/// Client address forwarded by the web front end, if any.
pub(crate) fn client_ip(params: &Value) -> Option<String> {
    params
        .get("client_ip")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}
