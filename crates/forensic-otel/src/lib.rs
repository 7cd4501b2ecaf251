use once_cell::sync::OnceCell;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

/// Target used by the server's per-request access log lines.
pub const ACCESS_TARGET: &str = "http.access";

static ACCESS_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Minutely,
    Hourly,
    Daily,
}

impl Rotation {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hourly" => Rotation::Hourly,
            "minutely" => Rotation::Minutely,
            _ => Rotation::Daily,
        }
    }
}

/// Rolling file sink for `http.access` events, enabled with `FORENSIC_ACCESS_LOG_ROLL=1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLogFile {
    pub dir: String,
    pub prefix: String,
    pub rotation: Rotation,
}

impl AccessLogFile {
    pub fn from_env() -> Option<Self> {
        if std::env::var("FORENSIC_ACCESS_LOG_ROLL").ok().as_deref() != Some("1") {
            return None;
        }
        let dir = std::env::var("FORENSIC_ACCESS_LOG_DIR")
            .ok()
            .or_else(|| std::env::var("FORENSIC_LOGS_DIR").ok())
            .unwrap_or_else(|| "logs".to_string());
        let prefix =
            std::env::var("FORENSIC_ACCESS_LOG_PREFIX").unwrap_or_else(|_| "http-access".into());
        let rotation = std::env::var("FORENSIC_ACCESS_LOG_ROTATION")
            .map(|raw| Rotation::parse(&raw))
            .unwrap_or(Rotation::Daily);
        Some(Self {
            dir,
            prefix,
            rotation,
        })
    }
}

/// Installs the global subscriber. `RUST_LOG` drives the console filter (default `info`).
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(fmt::layer().with_filter(filter));

    let Some(file) = AccessLogFile::from_env() else {
        let _ = registry.try_init();
        return;
    };

    if std::fs::create_dir_all(&file.dir).is_err() {
        tracing::warn!(directory = %file.dir, "failed to create access log directory");
    }
    let writer = match file.rotation {
        Rotation::Minutely => tracing_appender::rolling::minutely(&file.dir, &file.prefix),
        Rotation::Hourly => tracing_appender::rolling::hourly(&file.dir, &file.prefix),
        Rotation::Daily => tracing_appender::rolling::daily(&file.dir, &file.prefix),
    };
    let (nb, guard) = tracing_appender::non_blocking(writer);
    let _ = ACCESS_GUARD.set(guard);
    let access_layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(nb)
        .with_filter(Targets::new().with_target(ACCESS_TARGET, tracing::Level::INFO));
    let _ = registry.with(access_layer).try_init();
}
