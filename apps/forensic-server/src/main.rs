use std::{net::SocketAddr, time::Duration};
use tracing::{error, info};

mod access_log;
mod api;
mod app_state;
mod bootstrap;
pub mod config;
mod cors;
mod feedback;
mod finetune;
mod generation;
mod http_client;
mod http_timeout;
mod models;
mod openapi;
mod prompts;
mod provider;
mod responses;
mod router;
mod tasks;
#[cfg(test)]
mod test_support;
mod weather;

#[tokio::main]
async fn main() {
    forensic_otel::init();
    http_timeout::init_from_env();

    let settings = match config::Settings::load() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };
    let http_cfg = match bootstrap::http_config_from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };
    let bootstrap::BootstrapOutput {
        router,
        state,
        background_tasks,
    } = match bootstrap::build(settings) {
        Ok(out) => out,
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(2);
        }
    };
    info!(
        db = %state.kernel().db_path().display(),
        default_model = %state.settings().provider.default_model,
        "store ready"
    );

    let app = bootstrap::attach_global_layers(bootstrap::attach_http_layers(
        router,
        http_cfg.concurrency_limit,
    ));

    let listener = match tokio::net::TcpListener::bind(http_cfg.addr).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("error: failed to bind {}: {err}", http_cfg.addr);
            std::process::exit(2);
        }
    };
    info!(addr = %http_cfg.addr, "forensic-server listening");

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    if let Err(err) = server.await {
        error!("http server exited with error: {err}");
    }

    info!("shutting down background tasks");
    background_tasks
        .shutdown_with_grace(Duration::from_secs(5))
        .await;
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                error!(%err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received");
}
