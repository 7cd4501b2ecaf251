//! Rating intake: persist every rating, copy high ratings into the trainable subset,
//! and queue a retraining trigger once enough recent high-quality ratings accumulate.

use chrono::{DateTime, Duration, Utc};
use forensic_kernel::{FeedbackEntry, NewFeedback};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::app_state::AppState;
use crate::finetune::REASON_AUTO;
use crate::prompts;

/// Raw request body. Every field is optional here so absence can be reported uniformly.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackSubmission {
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub section_id: Option<Value>,
    #[serde(default)]
    #[schema(value_type = Option<i64>)]
    pub rating: Option<Value>,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub feedback: Option<Value>,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub generated_content: Option<Value>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub original_prompt: Option<Value>,
}

/// Submission with every required field present.
#[derive(Debug, Clone)]
pub struct ValidFeedback {
    pub section_id: String,
    pub rating: i64,
    pub feedback: String,
    pub generated_content: String,
    pub original_prompt: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Missing required fields: sectionId, rating, feedback, generatedContent, originalPrompt")]
    MissingFields,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecordOutcome {
    pub success: bool,
    pub message: String,
    pub triggered_fine_tune: bool,
    pub high_quality_count: i64,
}

/// Absent, null, false, zero and the empty string count as missing.
fn present(value: Option<Value>) -> Option<Value> {
    match value? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        other => Some(other),
    }
}

fn present_text(value: Option<Value>) -> Option<String> {
    match present(value)? {
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Integer ratings pass through; fractional ones are floored so `>=` thresholds compare the same.
fn rating_value(value: Option<Value>) -> Option<i64> {
    let number = match present(value)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(f64::floor).map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.floor() as i64))
        }
        _ => None,
    }?;
    Some(number)
}

impl FeedbackSubmission {
    /// Presence check only; the rating range is not enforced.
    pub fn validate(self) -> Result<ValidFeedback, RecordError> {
        let rating = rating_value(self.rating);
        match (
            present_text(self.section_id),
            rating,
            present_text(self.feedback),
            present_text(self.generated_content),
            present(self.original_prompt),
        ) {
            (
                Some(section_id),
                Some(rating),
                Some(feedback),
                Some(generated_content),
                Some(original_prompt),
            ) => Ok(ValidFeedback {
                section_id,
                rating,
                feedback,
                generated_content,
                original_prompt,
            }),
            _ => Err(RecordError::MissingFields),
        }
    }
}

pub async fn record_feedback(
    state: &AppState,
    submission: FeedbackSubmission,
    now: DateTime<Utc>,
) -> Result<(FeedbackEntry, RecordOutcome), RecordError> {
    let valid = submission.validate()?;
    let cfg = &state.settings().finetune;
    let high_quality = valid.rating >= cfg.high_quality_rating;

    let messages = prompts::training_messages(&valid.original_prompt, &valid.generated_content);
    let entry = state
        .kernel()
        .insert_feedback_async(
            NewFeedback {
                section_id: valid.section_id,
                rating: valid.rating,
                feedback_text: valid.feedback,
                generated_content: valid.generated_content,
                original_prompt: valid.original_prompt,
                timestamp: now,
                messages,
            },
            high_quality,
        )
        .await?;
    tracing::debug!(id = %entry.id, section = %entry.section_id, rating = entry.rating, high_quality, "feedback stored");

    let mut triggered_fine_tune = false;
    let mut high_quality_count = 0;
    if high_quality {
        let since = now - Duration::hours(cfg.auto_trigger_window_hours);
        high_quality_count = state.kernel().count_high_quality_since_async(since).await?;
        if high_quality_count >= cfg.auto_trigger_threshold {
            triggered_fine_tune = true;
            if state.finetune().submit(REASON_AUTO) {
                tracing::info!(high_quality_count, "automatic fine-tune queued");
            }
        }
    }

    let outcome = RecordOutcome {
        success: true,
        message: "Feedback stored".to_string(),
        triggered_fine_tune,
        high_quality_count,
    };
    Ok((entry, outcome))
}
