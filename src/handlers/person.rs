use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::runner::{self, PersonSyncError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PersonSyncRequest {
    pub institution_identifier: String,
    pub cpr: String,
}

pub async fn sync_person(
    State(state): State<AppState>,
    Json(request): Json<PersonSyncRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    match runner::sync_single_person(&state, &request.institution_identifier, &request.cpr).await
    {
        Ok(operations) => {
            let body: Vec<Value> = operations
                .iter()
                .map(|(kind, uuid)| json!({ "operation": kind.to_string(), "uuid": uuid }))
                .collect();
            Ok(Json(json!(body)))
        }
        Err(PersonSyncError::NotFound) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "msg": "person not found" })),
        )),
        Err(error) => {
            tracing::error!("person sync failed: {error}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "msg": error.to_string() })),
            ))
        }
    }
}
