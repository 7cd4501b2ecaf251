use axum::http::{Method, Request};
use axum::middleware::Next;
use axum::response::Response;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Clone, Debug)]
struct Cfg {
    enabled: bool,
    sample_n: u64,
    ua: bool,
}

static CFG: Lazy<Cfg> = Lazy::new(|| Cfg {
    enabled: std::env::var("FORENSIC_ACCESS_LOG").ok().as_deref() == Some("1"),
    sample_n: std::env::var("FORENSIC_ACCESS_SAMPLE_N")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1)
        .max(1),
    ua: std::env::var("FORENSIC_ACCESS_UA").ok().as_deref() == Some("1"),
});

static COUNTER: AtomicU64 = AtomicU64::new(0);

struct RequestLine {
    method: Method,
    path: String,
    ua: Option<String>,
}

/// Runs outside the router, so the raw request path is what gets logged.
fn request_line<B>(req: &Request<B>, with_ua: bool) -> RequestLine {
    let ua = if with_ua {
        req.headers()
            .get(axum::http::header::USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string())
    } else {
        None
    };
    RequestLine {
        method: req.method().clone(),
        path: req.uri().path().to_string(),
        ua,
    }
}

/// One JSON line per request on the `http.access` target when `FORENSIC_ACCESS_LOG=1`.
pub async fn access_log_mw(req: Request<axum::body::Body>, next: Next) -> Response {
    if !CFG.enabled {
        return next.run(req).await;
    }
    let started = Instant::now();
    let line = request_line(&req, CFG.ua);
    let res = next.run(req).await;
    let n = COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    if CFG.sample_n > 1 && n % CFG.sample_n != 0 {
        return res;
    }
    let mut obj = serde_json::json!({
        "ts": forensic_kernel::format_ts(chrono::Utc::now()),
        "method": line.method.as_str(),
        "path": line.path,
        "status": res.status().as_u16(),
        "dur_ms": started.elapsed().as_millis() as u64,
    });
    if let Some(ua) = line.ua {
        obj["ua"] = serde_json::Value::String(ua);
    }
    tracing::info!(target: forensic_otel::ACCESS_TARGET, "{}", obj);
    res
}
