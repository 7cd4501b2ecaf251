use axum::body::Bytes;
use serde::de::DeserializeOwned;

/// Decodes a JSON request body. Handlers take raw bytes so decode failures
/// surface in the endpoint's own error shape instead of axum's rejection text.
pub fn json_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, serde_json::Error> {
    serde_json::from_slice(body)
}

/// Like [`json_body`], but an empty or whitespace-only body yields `T::default()`.
pub fn optional_json_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
}
