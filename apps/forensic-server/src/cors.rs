use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

/// `Access-Control-Allow-Methods` value for one route.
#[derive(Clone, Copy, Debug)]
pub(crate) struct AllowMethods(pub &'static str);

pub(crate) const READ: AllowMethods = AllowMethods("GET, OPTIONS");
pub(crate) const WRITE: AllowMethods = AllowMethods("POST, OPTIONS");

/// Answers `OPTIONS` with an empty 200 and stamps the CORS headers on every response.
pub(crate) async fn cors_mw(
    State(methods): State<AllowMethods>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let mut res = if req.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(req).await
    };
    let h = res.headers_mut();
    h.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    h.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    h.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(methods.0),
    );
    res
}
