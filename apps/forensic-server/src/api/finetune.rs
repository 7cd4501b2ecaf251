use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::http_utils;
use crate::app_state::AppState;
use crate::finetune::{self, TriggerOutcome, REASON_MANUAL};
use crate::provider::FineTuneJob;
use crate::responses::ApiError;

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TriggerRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Returned when no job was submitted.
#[derive(Debug, Serialize, ToSchema)]
pub struct TriggerSkipped {
    pub message: String,
    pub count: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TriggerSubmitted {
    pub message: String,
    pub job: FineTuneJob,
}

#[utoipa::path(
    post,
    path = "/api/trigger-finetune",
    tag = "Fine-tuning",
    request_body(content = TriggerRequest, description = "Optional; an empty body is accepted"),
    responses(
        (status = 200, description = "Job created", body = TriggerSubmitted),
        (status = 200, description = "Not enough examples, or window already claimed", body = TriggerSkipped),
        (status = 500, description = "Store or provider failure")
    )
)]
pub async fn trigger_finetune(State(state): State<AppState>, body: Bytes) -> Response {
    let req: TriggerRequest = match http_utils::optional_json_body(&body) {
        Ok(req) => req,
        Err(err) => return ApiError::upstream(err.to_string()).into_response(),
    };
    let reason = req
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| REASON_MANUAL.to_string());
    match finetune::run_trigger(&state, &reason, Utc::now()).await {
        Ok(TriggerOutcome::InsufficientData { count }) => Json(TriggerSkipped {
            message: "Not enough high-quality examples for fine-tuning yet".into(),
            count,
        })
        .into_response(),
        Ok(TriggerOutcome::AlreadyClaimed { count }) => Json(TriggerSkipped {
            message: "Fine-tune already submitted for this window".into(),
            count,
        })
        .into_response(),
        Ok(TriggerOutcome::Submitted { job, .. }) => Json(TriggerSubmitted {
            message: "Fine-tune job created".into(),
            job,
        })
        .into_response(),
        Err(err) => ApiError::upstream(format!("{err:#}")).into_response(),
    }
}
