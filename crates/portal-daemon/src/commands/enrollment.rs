//! Enrollment and verification command handlers.

use std::sync::Arc;

use portal_types::api::{EnrollRequest, TokenRequest};
use portal_types::{StudentId, POLL_INTERVAL_SECS};
use serde::Deserialize;
use serde_json::Value;

use super::{client_ip, parse_params, with_portal};
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

#[derive(Deserialize)]
struct EmailChangeParams {
    student_id: i64,
    email: String,
}

#[derive(Deserialize)]
struct RecoveryParams {
    national_id: String,
}

fn to_value<T: serde::Serialize>(value: &T) -> Result {
    serde_json::to_value(value).map_err(|e| RpcError::internal_error(&e.to_string()))
}

/// Submit an enrollment form.
pub async fn enroll(state: &Arc<DaemonState>, params: &Value) -> Result {
    let request: EnrollRequest = parse_params(params)?;
    let ip = client_ip(params);
    let outcome = with_portal(state, move |portal| portal.enroll(&request, ip.as_deref())).await?;
    let mut value = to_value(&outcome.to_response())?;
    attach_poll_url(state, &mut value);
    Ok(value)
}

/// Points the waiting page at its status endpoint.
fn attach_poll_url(state: &Arc<DaemonState>, value: &mut Value) {
    let url = match value.get("poll_token").and_then(Value::as_str) {
        Some(token) => state.config.link_builder().poll_link(token),
        None => return,
    };
    value["poll_url"] = Value::String(url);
}

/// Confirm a token from an email link.
pub async fn confirm(state: &Arc<DaemonState>, params: &Value) -> Result {
    let TokenRequest { token } = parse_params(params)?;
    let ip = client_ip(params);
    let confirmation = with_portal(state, move |portal| portal.confirm(&token, ip.as_deref())).await?;
    let mut value = to_value(&confirmation.to_response())?;
    value["student_id"] = serde_json::json!(confirmation.student_id.0);
    Ok(value)
}

/// Poll a pending verification. Read-only.
pub async fn status(state: &Arc<DaemonState>, params: &Value) -> Result {
    let TokenRequest { token } = parse_params(params)?;
    let status = with_portal(state, move |portal| portal.status(&token)).await?;
    let mut value = to_value(&status)?;
    value["poll_interval_secs"] = serde_json::json!(POLL_INTERVAL_SECS);
    Ok(value)
}

/// Issue a replacement token and email it.
pub async fn resend(state: &Arc<DaemonState>, params: &Value) -> Result {
    let TokenRequest { token } = parse_params(params)?;
    let ip = client_ip(params);
    let pending = with_portal(state, move |portal| portal.resend(&token, ip.as_deref())).await?;
    let mut value = to_value(&pending.to_response())?;
    attach_poll_url(state, &mut value);
    Ok(value)
}

pub async fn request_email_change(state: &Arc<DaemonState>, params: &Value) -> Result {
    let EmailChangeParams { student_id, email } = parse_params(params)?;
    let ip = client_ip(params);
    let pending = with_portal(state, move |portal| {
        portal.request_email_change(StudentId(student_id), &email, ip.as_deref())
    })
    .await?;
    to_value(&pending.to_response())
}

pub async fn request_recovery(state: &Arc<DaemonState>, params: &Value) -> Result {
    let RecoveryParams { national_id } = parse_params(params)?;
    let ip = client_ip(params);
    let pending =
        with_portal(state, move |portal| portal.request_recovery(&national_id, ip.as_deref())).await?;
    to_value(&pending.to_response())
}
