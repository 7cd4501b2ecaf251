use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::http_utils;
use crate::app_state::AppState;
use crate::generation::{self, GenerateRequest, GeneratedSection};
use crate::responses::ApiError;

const FAILED: &str = "Failed to generate section";

#[utoipa::path(
    post,
    path = "/api/generate-section",
    tag = "Reports",
    request_body = GenerateRequest,
    responses(
        (status = 200, description = "Generated section text", body = GeneratedSection),
        (status = 500, description = "Malformed body, store or provider failure")
    )
)]
pub async fn generate_section(State(state): State<AppState>, body: Bytes) -> Response {
    let req: GenerateRequest = match http_utils::json_body(&body) {
        Ok(req) => req,
        Err(err) => return ApiError::upstream_with_details(FAILED, err).into_response(),
    };
    match generation::generate_section(&state, req).await {
        Ok(section) => Json(section).into_response(),
        Err(err) => ApiError::upstream_with_details(FAILED, format!("{err:#}")).into_response(),
    }
}
