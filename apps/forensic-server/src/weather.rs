use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::config::WeatherSettings;
use crate::http_client;

/// Historical weather lookup keyed by location and date. `Ok(None)` means "no data".
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn lookup(&self, location: &str, date: &str) -> Result<Option<Value>>;
}

/// Visual Crossing timeline API.
pub struct VisualCrossing {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    unit_group: String,
}

impl VisualCrossing {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        api_key: Option<String>,
        unit_group: &str,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            unit_group: unit_group.to_string(),
        }
    }

    pub fn from_settings(settings: &WeatherSettings) -> Self {
        Self::new(
            http_client::client().clone(),
            &settings.base_url,
            settings.api_key.clone(),
            &settings.unit_group,
        )
    }

    fn timeline_url(&self, location: &str, date: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("invalid weather base url {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("weather base url cannot carry a path"))?
            .pop_if_empty()
            .extend([
                "VisualCrossingWebServices",
                "rest",
                "services",
                "timeline",
                location,
                date,
            ]);
        Ok(url)
    }
}

#[async_trait]
impl WeatherSource for VisualCrossing {
    async fn lookup(&self, location: &str, date: &str) -> Result<Option<Value>> {
        let Some(key) = self.api_key.as_deref() else {
            tracing::debug!("weather api key not configured; skipping lookup");
            return Ok(None);
        };
        let url = self.timeline_url(location, date)?;
        let resp = self
            .client
            .get(url)
            .query(&[
                ("unitGroup", self.unit_group.as_str()),
                ("key", key),
                ("include", "hours"),
            ])
            .send()
            .await
            .context("weather request failed")?
            .error_for_status()
            .context("weather api returned an error status")?;
        let body = resp
            .json::<Value>()
            .await
            .context("weather response was not JSON")?;
        Ok(Some(body))
    }
}

/// First day of a timeline response, which is the day of loss.
pub fn first_day(timeline: &Value) -> Option<&Value> {
    timeline
        .get("days")
        .and_then(|d| d.as_array())
        .and_then(|days| days.first())
}
