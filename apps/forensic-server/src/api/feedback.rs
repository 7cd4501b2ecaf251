use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;

use super::http_utils;
use crate::app_state::AppState;
use crate::feedback::{self, FeedbackSubmission, RecordError, RecordOutcome};
use crate::responses::ApiError;

#[utoipa::path(
    post,
    path = "/api/store-feedback",
    tag = "Feedback",
    request_body = FeedbackSubmission,
    responses(
        (status = 200, description = "Feedback stored", body = RecordOutcome),
        (status = 500, description = "Required field missing, malformed body or store failure")
    )
)]
pub async fn store_feedback(State(state): State<AppState>, body: Bytes) -> Response {
    let submission: FeedbackSubmission = match http_utils::json_body(&body) {
        Ok(sub) => sub,
        Err(err) => return ApiError::upstream(err.to_string()).into_response(),
    };
    match feedback::record_feedback(&state, submission, Utc::now()).await {
        Ok((_entry, outcome)) => Json(outcome).into_response(),
        Err(err @ RecordError::MissingFields) => {
            ApiError::Validation(err.to_string()).into_response()
        }
        Err(RecordError::Store(err)) => ApiError::upstream(format!("{err:#}")).into_response(),
    }
}
