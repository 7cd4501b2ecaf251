use std::sync::Arc;

use anyhow::{Context, Result};
use forensic_kernel::Kernel;
use tracing::info;

use crate::access_log;
use crate::app_state::AppState;
use crate::config::Settings;
use crate::finetune::{self, FineTuneDispatcher};
use crate::router;
use crate::tasks::TaskManager;

pub(crate) struct BootstrapOutput {
    pub router: axum::Router<()>,
    pub state: AppState,
    pub background_tasks: TaskManager,
}

/// Opens the store, wires the default collaborators and starts the fine-tune worker.
pub(crate) fn build(settings: Settings) -> Result<BootstrapOutput> {
    let kernel = Kernel::open(&settings.store.state_dir).with_context(|| {
        format!(
            "failed to open store in {}",
            settings.store.state_dir.display()
        )
    })?;
    if settings.provider.api_key.is_none() {
        tracing::warn!("no model provider API key configured; generation and fine-tuning will fail");
    }
    let (dispatcher, rx) = FineTuneDispatcher::channel(settings.finetune.queue_capacity);
    let state = AppState::builder(kernel, Arc::new(settings), dispatcher).build();
    Ok(assemble(state, rx))
}

pub(crate) fn assemble(
    state: AppState,
    rx: tokio::sync::mpsc::Receiver<finetune::FineTuneRequest>,
) -> BootstrapOutput {
    let mut background_tasks = TaskManager::new();
    let shutdown = background_tasks.shutdown_token();
    background_tasks.push(finetune::spawn_worker(state.clone(), rx, shutdown));

    let (routes, endpoints) = router::build_router();
    info!(count = endpoints.len(), endpoints = ?endpoints, "routes registered");
    BootstrapOutput {
        router: routes.with_state(state.clone()),
        state,
        background_tasks,
    }
}

pub(crate) fn attach_http_layers(
    router: axum::Router<()>,
    concurrency_limit: usize,
) -> axum::Router<()> {
    use tower::limit::ConcurrencyLimitLayer;
    use tower_http::trace::TraceLayer;

    router
        .layer(TraceLayer::new_for_http())
        .layer(ConcurrencyLimitLayer::new(concurrency_limit))
}

pub(crate) fn attach_global_layers(router: axum::Router<()>) -> axum::Router<()> {
    router.layer(axum::middleware::from_fn(access_log::access_log_mw))
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum HttpConfigError {
    #[error("invalid FORENSIC_HTTP_MAX_CONC: {0}")]
    InvalidConcurrency(String),
    #[error("invalid FORENSIC_PORT: {0}")]
    InvalidPort(String),
    #[error("invalid FORENSIC_BIND: {0}")]
    InvalidBind(String),
}

#[derive(Debug)]
pub(crate) struct HttpConfig {
    pub addr: std::net::SocketAddr,
    pub concurrency_limit: usize,
}

pub(crate) fn http_config_from_env() -> Result<HttpConfig, HttpConfigError> {
    let concurrency_limit = std::env::var("FORENSIC_HTTP_MAX_CONC")
        .ok()
        .map(|raw| {
            raw.parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(HttpConfigError::InvalidConcurrency(raw))
        })
        .transpose()?
        .unwrap_or(256);

    let bind = std::env::var("FORENSIC_BIND").unwrap_or_else(|_| "127.0.0.1".into());
    let port_raw = std::env::var("FORENSIC_PORT").unwrap_or_else(|_| "8091".into());
    let port: u16 = port_raw
        .parse()
        .map_err(|_| HttpConfigError::InvalidPort(port_raw))?;

    let addr = format!("{}:{}", bind, port)
        .parse()
        .map_err(|_| HttpConfigError::InvalidBind(bind.clone()))?;

    Ok(HttpConfig {
        addr,
        concurrency_limit,
    })
}
