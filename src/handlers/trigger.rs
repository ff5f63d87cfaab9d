use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::run_db::RunStatus;
use crate::runner::{self, RunError};
use crate::AppState;

pub async fn index() -> Json<Value> {
    Json(json!({ "name": "orgsync-api" }))
}

#[derive(Debug, Deserialize)]
pub struct TriggerParams {
    pub org_unit: Option<Uuid>,
    #[serde(default)]
    pub dry_run: bool,
}

pub async fn trigger(
    State(state): State<AppState>,
    Query(params): Query<TriggerParams>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    match runner::trigger_run(&state, params.org_unit, params.dry_run).await {
        Ok(operations) => {
            let body: Vec<Value> = operations
                .iter()
                .map(|(kind, uuid)| json!({ "operation": kind.to_string(), "uuid": uuid }))
                .collect();
            Ok(Json(json!(body)))
        }
        Err(RunError::GateLocked) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "msg": "Previous run did not complete successfully!" })),
        )),
        Err(error) => {
            tracing::error!("trigger failed: {error}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "msg": error.to_string() })),
            ))
        }
    }
}

/// Textual gate status: 0 = idle, 1 = running, 3 = storage error.
/// Always HTTP 200 so schedulers can poll it blindly.
pub async fn rundb_status(State(state): State<AppState>) -> String {
    let code = match state.run_db.get_status() {
        Ok(Some(RunStatus::Running)) => 1,
        Ok(_) => 0,
        Err(error) => {
            tracing::error!("could not read run status: {error}");
            3
        }
    };
    code.to_string()
}
