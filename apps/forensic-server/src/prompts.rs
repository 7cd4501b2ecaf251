use forensic_kernel::ChatMessage;
use serde_json::Value;

pub const SYSTEM_PROMPT: &str = "You are an expert forensic engineer. Generate a professional, step-by-step report section. Incorporate best practices in forensic engineering.";

/// System turn stored with every training example.
pub const TRAINING_SYSTEM_PROMPT: &str = "You are an expert forensic engineer...";

const MISSING: &str = "Not provided";

/// Everything that goes into the user turn of a generation request.
pub struct PromptParts<'a> {
    pub section: &'a str,
    pub context: &'a Value,
    pub custom_instructions: Option<&'a str>,
    pub relevant_feedback: &'a [String],
    pub weather_day: Option<&'a Value>,
}

fn context_field(context: &Value, key: &str) -> String {
    match context.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => MISSING.to_string(),
    }
}

/// Section-specific template, or the generic "titled" prompt for unknown ids.
pub fn base_prompt(section: &str, context: &Value) -> String {
    match section {
        "authorization" => format!(
            "Generate the \"Authorization and Scope of Investigation\" section:\n- Investigation Date: {}\n- Property Location: {}",
            context_field(context, "investigationDate"),
            context_field(context, "location"),
        ),
        "background" => format!(
            "Generate the \"Background Information\" section:\n- Property Age: {}\n- Construction Type: {}",
            context_field(context, "propertyAge"),
            context_field(context, "constructionType"),
        ),
        other => format!("Generate a forensic engineering report section titled: {other}."),
    }
}

pub fn user_prompt(parts: &PromptParts<'_>) -> String {
    let mut prompt = base_prompt(parts.section, parts.context);
    if let Some(extra) = parts.custom_instructions.filter(|s| !s.trim().is_empty()) {
        prompt.push_str("\nAdditional instructions: ");
        prompt.push_str(extra);
    }

    let mut blocks = vec![prompt];
    if !parts.relevant_feedback.is_empty() {
        let lines: Vec<String> = parts
            .relevant_feedback
            .iter()
            .map(|f| format!("User Feedback: {f}"))
            .collect();
        blocks.push(lines.join("\n"));
    }
    if let Some(day) = parts.weather_day {
        let rendered = serde_json::to_string_pretty(day).unwrap_or_else(|_| day.to_string());
        blocks.push(format!("Weather data: {rendered}"));
    }
    blocks.join("\n\n")
}

pub fn generation_messages(parts: &PromptParts<'_>) -> Vec<ChatMessage> {
    vec![
        ChatMessage::new("system", SYSTEM_PROMPT),
        ChatMessage::new("user", user_prompt(parts)),
    ]
}

/// Conversation recorded alongside a rating; this is the fine-tune training line.
pub fn training_messages(original_prompt: &Value, generated_content: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::new("system", TRAINING_SYSTEM_PROMPT),
        ChatMessage::new("user", original_prompt.to_string()),
        ChatMessage::new("assistant", generated_content),
    ]
}
