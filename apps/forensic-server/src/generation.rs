use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::app_state::AppState;
use crate::models;
use crate::prompts::{self, PromptParts};
use crate::provider::CompletionRequest;
use crate::weather;

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub section: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub context: Value,
    #[serde(default)]
    pub custom_instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedSection {
    pub section: String,
    pub section_name: String,
}

async fn relevant_feedback(state: &AppState, section: &str) -> Result<Vec<String>> {
    let limit = state.settings().prompts.relevant_feedback_limit;
    if limit <= 0 {
        return Ok(Vec::new());
    }
    let entries = state
        .kernel()
        .recent_high_quality_for_section_async(section, limit)
        .await
        .context("failed to read relevant feedback")?;
    Ok(entries.into_iter().map(|e| e.feedback_text).collect())
}

/// Timeline for `context.location` on `context.dateOfLoss`; any failure means no enrichment.
async fn weather_for(state: &AppState, context: &Value) -> Option<Value> {
    let location = context.get("location").and_then(Value::as_str)?.trim();
    let date = context.get("dateOfLoss").and_then(Value::as_str)?.trim();
    if location.is_empty() || date.is_empty() {
        return None;
    }
    match state.weather().lookup(location, date).await {
        Ok(data) => data,
        Err(err) => {
            tracing::warn!(location, date, error = ?err, "weather lookup failed");
            None
        }
    }
}

pub async fn generate_section(state: &AppState, req: GenerateRequest) -> Result<GeneratedSection> {
    let feedback = relevant_feedback(state, &req.section).await?;
    let timeline = weather_for(state, &req.context).await;
    let model = models::active_model_id(state).await;

    let messages = prompts::generation_messages(&PromptParts {
        section: &req.section,
        context: &req.context,
        custom_instructions: req.custom_instructions.as_deref(),
        relevant_feedback: &feedback,
        weather_day: timeline.as_ref().and_then(weather::first_day),
    });
    let provider_cfg = &state.settings().provider;
    let request = CompletionRequest {
        model,
        messages,
        temperature: provider_cfg.temperature,
        max_tokens: provider_cfg.max_tokens,
    };
    tracing::debug!(section = %req.section, model = %request.model, "generating section");
    let text = state.provider().complete(&request).await?;
    Ok(GeneratedSection {
        section: text,
        section_name: req.section,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, FakeProvider, FakeWeather};
    use chrono::Utc;
    use forensic_kernel::{ChatMessage, NewFeedback};
    use serde_json::json;
    use std::sync::Arc;

    fn request(section: &str, context: Value) -> GenerateRequest {
        GenerateRequest {
            section: section.into(),
            context,
            custom_instructions: None,
        }
    }

    #[tokio::test]
    async fn uses_default_model_and_configured_sampling() {
        let provider = Arc::new(FakeProvider::with_completion("Generated background"));
        let (state, _rx, _dir) = test_support::state_with(provider.clone(), |_| {});
        let out = generate_section(&state, request("background", json!({"propertyAge": 30})))
            .await
            .expect("generate");
        assert_eq!(
            out,
            GeneratedSection {
                section: "Generated background".into(),
                section_name: "background".into(),
            }
        );
        let sent = provider.completions();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].model, "gpt-3.5-turbo");
        assert_eq!(sent[0].temperature, 0.7);
        assert_eq!(sent[0].max_tokens, 1000);
        assert_eq!(sent[0].messages[0].content, prompts::SYSTEM_PROMPT);
        assert!(sent[0].messages[1].content.contains("- Property Age: 30"));
    }

    #[tokio::test]
    async fn promoted_model_is_used() {
        let provider = Arc::new(FakeProvider::with_completion("ok"));
        let (state, _rx, _dir) = test_support::state_with(provider.clone(), |_| {});
        models::promote_model(&state, "ft:custom", Utc::now())
            .await
            .expect("promote");
        generate_section(&state, request("summary", Value::Null))
            .await
            .expect("generate");
        assert_eq!(provider.completions()[0].model, "ft:custom");
    }

    #[tokio::test]
    async fn high_quality_feedback_for_the_section_is_included() {
        let provider = Arc::new(FakeProvider::with_completion("ok"));
        let (state, _rx, _dir) = test_support::state_with(provider.clone(), |_| {});
        for (section, text) in [("background", "mention soil type"), ("authorization", "other")] {
            let new = NewFeedback {
                section_id: section.into(),
                rating: 7,
                feedback_text: text.into(),
                generated_content: "c".into(),
                original_prompt: json!("p"),
                timestamp: Utc::now(),
                messages: vec![ChatMessage::new("user", "p")],
            };
            state.kernel().insert_feedback(&new, true).expect("seed");
        }
        generate_section(&state, request("background", json!({})))
            .await
            .expect("generate");
        let user = &provider.completions()[0].messages[1].content;
        assert!(user.contains("User Feedback: mention soil type"));
        assert!(!user.contains("User Feedback: other"));
    }

    #[tokio::test]
    async fn weather_day_is_embedded_when_location_and_date_are_given() {
        let provider = Arc::new(FakeProvider::with_completion("ok"));
        let weather = Arc::new(FakeWeather::returning(json!({
            "days": [{"datetime": "2024-05-01", "windgust": 61.2}]
        })));
        let (state, _rx, _dir) =
            test_support::state_with_weather(provider.clone(), weather.clone(), |_| {});
        generate_section(
            &state,
            request(
                "background",
                json!({"location": "Austin, TX", "dateOfLoss": "2024-05-01"}),
            ),
        )
        .await
        .expect("generate");
        assert_eq!(
            weather.calls(),
            vec![("Austin, TX".to_string(), "2024-05-01".to_string())]
        );
        assert!(provider.completions()[0].messages[1]
            .content
            .contains("Weather data: {"));
    }

    #[tokio::test]
    async fn weather_failure_does_not_fail_generation() {
        let provider = Arc::new(FakeProvider::with_completion("ok"));
        let weather = Arc::new(FakeWeather::failing());
        let (state, _rx, _dir) = test_support::state_with_weather(provider.clone(), weather, |_| {});
        let out = generate_section(
            &state,
            request("background", json!({"location": "Austin", "dateOfLoss": "2024-05-01"})),
        )
        .await
        .expect("generate");
        assert_eq!(out.section, "ok");
        assert!(!provider.completions()[0].messages[1]
            .content
            .contains("Weather data"));
    }

    #[tokio::test]
    async fn provider_failure_is_an_error() {
        let provider = Arc::new(FakeProvider::default());
        provider.fail_completions(true);
        let (state, _rx, _dir) = test_support::state_with(provider, |_| {});
        assert!(generate_section(&state, request("background", json!({})))
            .await
            .is_err());
    }
}
