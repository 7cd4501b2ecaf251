use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::http_utils;
use crate::app_state::AppState;
use crate::models::{self, ModelStatus};
use crate::responses::ApiError;

/// Active model id, or the fallback label when none has been promoted.
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "Models",
    responses(
        (status = 200, description = "Active model", body = ModelStatus),
        (status = 500, description = "Store failure")
    )
)]
pub async fn status(State(state): State<AppState>) -> Response {
    match models::model_status(&state).await {
        Ok(status) => Json(status).into_response(),
        Err(err) => ApiError::upstream(format!("{err:#}")).into_response(),
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PromoteModelRequest {
    #[serde(default)]
    pub model_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PromoteModelResponse {
    pub message: String,
    pub current_model: String,
    #[schema(nullable, value_type = Option<String>)]
    pub last_updated: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/promote-model",
    tag = "Models",
    request_body = PromoteModelRequest,
    responses(
        (status = 200, description = "Model promoted", body = PromoteModelResponse),
        (status = 500, description = "modelId missing"),
        (status = 500, description = "Store failure")
    )
)]
pub async fn promote_model(State(state): State<AppState>, body: Bytes) -> Response {
    let req: PromoteModelRequest = match http_utils::json_body(&body) {
        Ok(req) => req,
        Err(err) => return ApiError::upstream(err.to_string()).into_response(),
    };
    let Some(model_id) = req.model_id.filter(|m| !m.trim().is_empty()) else {
        return ApiError::Validation("Missing required fields: modelId".into()).into_response();
    };
    match models::promote_model(&state, model_id.trim(), Utc::now()).await {
        Ok(status) => Json(PromoteModelResponse {
            message: "Model promoted".into(),
            current_model: status.current_model,
            last_updated: status.last_updated,
        })
        .into_response(),
        Err(err) => ApiError::upstream(format!("{err:#}")).into_response(),
    }
}
