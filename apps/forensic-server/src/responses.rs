use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// HTTP-facing failure kinds. Every variant renders as a JSON body with an `error` field.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("Method Not Allowed")]
    MethodNotAllowed,
    #[error("{error}")]
    Upstream {
        error: String,
        details: Option<String>,
    },
}

impl ApiError {
    pub fn upstream(error: impl Into<String>) -> Self {
        ApiError::Upstream {
            error: error.into(),
            details: None,
        }
    }

    pub fn upstream_with_details(error: impl Into<String>, details: impl ToString) -> Self {
        ApiError::Upstream {
            error: error.into(),
            details: Some(details.to_string()),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Upstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Upstream {
                error,
                details: Some(details),
            } => json!({ "error": error, "details": details }),
            other => json!({ "error": other.to_string() }),
        };
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), body = %body, "request failed");
        }
        (status, Json(body)).into_response()
    }
}

pub async fn method_not_allowed() -> Response {
    ApiError::MethodNotAllowed.into_response()
}

pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not Found" }))).into_response()
}
