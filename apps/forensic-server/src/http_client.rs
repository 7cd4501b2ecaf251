use once_cell::sync::OnceCell;
use std::time::Duration;

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
}

fn connect_timeout() -> Duration {
    Duration::from_secs(env_u64("FORENSIC_HTTP_CONNECT_TIMEOUT_SECS", 3).max(1))
}

fn pool_idle() -> Duration {
    Duration::from_secs(env_u64("FORENSIC_HTTP_POOL_IDLE_SECS", 90).max(1))
}

fn user_agent() -> String {
    format!("forensic-server/{}", env!("CARGO_PKG_VERSION"))
}

/// Base client builder shared by the provider and weather clients.
pub fn builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .user_agent(user_agent())
        .connect_timeout(connect_timeout())
        .pool_idle_timeout(pool_idle())
}

/// Shared default client honoring the global outbound timeout.
pub fn client() -> &'static reqwest::Client {
    static CLIENT: OnceCell<reqwest::Client> = OnceCell::new();
    CLIENT.get_or_init(|| {
        builder()
            .timeout(crate::http_timeout::get_duration())
            .build()
            .unwrap_or_else(|err| {
                tracing::warn!(%err, "http client builder failed; using reqwest defaults");
                reqwest::Client::new()
            })
    })
}
