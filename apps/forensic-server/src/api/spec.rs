use axum::Json;
use utoipa::OpenApi;

/// OpenAPI document generated from the handler annotations.
#[utoipa::path(
    get,
    path = "/api/spec/openapi.json",
    tag = "Specs",
    responses((status = 200, description = "OpenAPI document", content_type = "application/json"))
)]
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(crate::openapi::ApiDoc::openapi())
}
