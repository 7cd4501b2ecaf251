use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use forensic_kernel::{ConfigRecord, KEY_LATEST_MODEL};
use serde::Serialize;
use utoipa::ToSchema;

use crate::app_state::AppState;

#[derive(Debug, Clone, Serialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatus {
    pub current_model: String,
    #[schema(nullable, value_type = Option<String>)]
    pub last_updated: Option<String>,
}

impl ModelStatus {
    fn from_record(record: Option<ConfigRecord>, fallback: String) -> Self {
        match record {
            Some(ConfigRecord {
                model_id: Some(model_id),
                timestamp,
                ..
            }) => ModelStatus {
                current_model: model_id,
                last_updated: timestamp,
            },
            _ => ModelStatus {
                current_model: fallback,
                last_updated: None,
            },
        }
    }
}

/// Model id used for generation. Store failures fall back to the default model.
pub async fn active_model_id(state: &AppState) -> String {
    let default_model = &state.settings().provider.default_model;
    match state.kernel().get_config_async(KEY_LATEST_MODEL).await {
        Ok(Some(ConfigRecord {
            model_id: Some(id), ..
        })) if !id.trim().is_empty() => id,
        Ok(_) => default_model.clone(),
        Err(err) => {
            tracing::warn!(error = ?err, fallback = %default_model, "active model lookup failed");
            default_model.clone()
        }
    }
}

pub async fn model_status(state: &AppState) -> Result<ModelStatus> {
    let record = state
        .kernel()
        .get_config_async(KEY_LATEST_MODEL)
        .await
        .context("failed to read active model")?;
    Ok(ModelStatus::from_record(
        record,
        state.settings().fallback_label(),
    ))
}

/// Makes `model_id` the model used by every subsequent generation.
pub async fn promote_model(state: &AppState, model_id: &str, now: DateTime<Utc>) -> Result<ModelStatus> {
    let record = state
        .kernel()
        .set_latest_model_async(model_id, now)
        .await
        .context("failed to promote model")?;
    tracing::info!(model_id, "model promoted");
    Ok(ModelStatus::from_record(
        Some(record),
        state.settings().fallback_label(),
    ))
}
