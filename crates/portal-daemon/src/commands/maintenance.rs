//! Maintenance and seeding command handlers.

use std::sync::Arc;

use portal_db::queries::trainings;
use portal_db::DbError;
use portal_enroll::clock::{Clock, SystemClock};
use portal_enroll::EnrollError;
use portal_types::TrainingId;
use serde::Deserialize;
use serde_json::Value;

use super::{parse_params, with_portal};
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

#[derive(Deserialize)]
struct TrainingParams {
    name: String,
    #[serde(default = "default_active")]
    active: bool,
    #[serde(default)]
    enrollment_opens_at: Option<u64>,
    #[serde(default)]
    enrollment_closes_at: Option<u64>,
}

fn default_active() -> bool {
    true
}

#[derive(Deserialize)]
struct ActiveParams {
    training_id: i64,
    active: bool,
}

/// Delete tokens past the retention window now.
pub async fn sweep_tokens(state: &Arc<DaemonState>) -> Result {
    let deleted = with_portal(state, |portal| portal.sweep_expired()).await?;
    Ok(serde_json::json!({"deleted": deleted}))
}

/// Add a training to the catalog.
pub async fn create_training(state: &Arc<DaemonState>, params: &Value) -> Result {
    let params: TrainingParams = parse_params(params)?;
    if params.name.trim().is_empty() {
        return Err(RpcError::invalid_params("name required"));
    }
    let bounds = [params.enrollment_opens_at, params.enrollment_closes_at];
    if bounds.into_iter().flatten().any(|t| i64::try_from(t).is_err()) {
        return Err(RpcError::invalid_params("enrollment window bound out of range"));
    }
    if let (Some(opens), Some(closes)) = (params.enrollment_opens_at, params.enrollment_closes_at) {
        if closes < opens {
            return Err(RpcError::invalid_params("enrollment window closes before it opens"));
        }
    }

    let store = state.store.clone();
    let id = tokio::task::spawn_blocking(move || {
        store.with_conn(|conn| -> std::result::Result<_, DbError> {
            trainings::insert(
                conn,
                params.name.trim(),
                params.active,
                params.enrollment_opens_at,
                params.enrollment_closes_at,
                SystemClock.now(),
            )
        })
    })
    .await
    .map_err(|e| RpcError::internal_error(&format!("task failed: {e}")))?
    .map_err(|e| RpcError::from_enroll(&EnrollError::from(e)))?;

    Ok(serde_json::json!({"training_id": id.0}))
}

/// Open or close a training for enrollment.
pub async fn set_training_active(state: &Arc<DaemonState>, params: &Value) -> Result {
    let ActiveParams { training_id, active } = parse_params(params)?;
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || {
        store.with_conn(|conn| trainings::set_active(conn, TrainingId(training_id), active))
    })
    .await
    .map_err(|e| RpcError::internal_error(&format!("task failed: {e}")))?
    .map_err(|e| match e {
        DbError::NotFound(_) => RpcError::from_enroll(&EnrollError::NotFound {
            field: "training_id",
            detail: format!("training {training_id}"),
        }),
        other => RpcError::from_enroll(&EnrollError::from(other)),
    })?;
    Ok(serde_json::json!({"training_id": training_id, "active": active}))
}

/// Liveness check.
pub async fn ping(_state: &Arc<DaemonState>) -> Result {
    Ok(serde_json::json!({
        "pong": true,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
