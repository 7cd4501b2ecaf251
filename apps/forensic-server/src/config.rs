use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML from {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
}

/// Effective service settings: optional TOML file (`FORENSIC_CONFIG`), then env overrides.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub finetune: FineTuneSettings,
    #[serde(default)]
    pub weather: WeatherSettings,
    #[serde(default)]
    pub prompts: PromptSettings,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = match std::env::var("FORENSIC_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        settings.apply_env()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(dir) = env_string("FORENSIC_STATE_DIR") {
            self.store.state_dir = PathBuf::from(dir);
        }

        if let Some(key) =
            env_string("FORENSIC_OPENAI_API_KEY").or_else(|| env_string("OPENAI_API_KEY"))
        {
            self.provider.api_key = Some(key);
        }
        if let Some(url) = env_string("FORENSIC_OPENAI_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Some(model) = env_string("FORENSIC_DEFAULT_MODEL") {
            self.provider.default_model = model;
        }
        env_parse("FORENSIC_TEMPERATURE", &mut self.provider.temperature)?;
        env_parse("FORENSIC_MAX_TOKENS", &mut self.provider.max_tokens)?;

        if let Some(model) = env_string("FORENSIC_FINETUNE_BASE_MODEL") {
            self.finetune.base_model = model;
        }
        env_parse("FORENSIC_FINETUNE_EPOCHS", &mut self.finetune.n_epochs)?;
        env_parse(
            "FORENSIC_AUTO_TRIGGER_THRESHOLD",
            &mut self.finetune.auto_trigger_threshold,
        )?;
        env_parse(
            "FORENSIC_FINETUNE_MIN_EXAMPLES",
            &mut self.finetune.min_examples,
        )?;
        env_parse("FORENSIC_FINETUNE_CLAIM_SECS", &mut self.finetune.claim_window_secs)?;
        env_parse("FORENSIC_FINETUNE_QUEUE", &mut self.finetune.queue_capacity)?;

        if let Some(key) =
            env_string("FORENSIC_WEATHER_API_KEY").or_else(|| env_string("WEATHER_API_KEY"))
        {
            self.weather.api_key = Some(key);
        }
        if let Some(url) = env_string("FORENSIC_WEATHER_BASE_URL") {
            self.weather.base_url = url;
        }

        env_parse(
            "FORENSIC_RELEVANT_FEEDBACK_LIMIT",
            &mut self.prompts.relevant_feedback_limit,
        )?;
        Ok(())
    }

    /// Label reported by the status endpoint when no model has been promoted.
    pub fn fallback_label(&self) -> String {
        format!("{} (fallback)", self.provider.default_model)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &'static str, slot: &mut T) -> Result<(), ConfigError> {
    if let Some(raw) = env_string(key) {
        *slot = raw
            .parse()
            .map_err(|_| ConfigError::InvalidEnv { key, value: raw })?;
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            default_model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct FineTuneSettings {
    #[serde(default = "default_model")]
    pub base_model: String,
    #[serde(default = "default_n_epochs")]
    pub n_epochs: u32,
    /// Ratings at or above this value are copied into the trainable subset.
    #[serde(default = "default_high_quality_rating")]
    pub high_quality_rating: i64,
    #[serde(default = "default_auto_trigger_threshold")]
    pub auto_trigger_threshold: i64,
    #[serde(default = "default_auto_trigger_window_hours")]
    pub auto_trigger_window_hours: i64,
    #[serde(default = "default_min_examples")]
    pub min_examples: usize,
    #[serde(default = "default_example_window_days")]
    pub example_window_days: i64,
    /// Width of a submission epoch in seconds; 0 disables claiming.
    #[serde(default)]
    pub claim_window_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for FineTuneSettings {
    fn default() -> Self {
        Self {
            base_model: default_model(),
            n_epochs: default_n_epochs(),
            high_quality_rating: default_high_quality_rating(),
            auto_trigger_threshold: default_auto_trigger_threshold(),
            auto_trigger_window_hours: default_auto_trigger_window_hours(),
            min_examples: default_min_examples(),
            example_window_days: default_example_window_days(),
            claim_window_secs: 0,
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_n_epochs() -> u32 {
    2
}

fn default_high_quality_rating() -> i64 {
    6
}

fn default_auto_trigger_threshold() -> i64 {
    10
}

fn default_min_examples() -> usize {
    10
}

fn default_auto_trigger_window_hours() -> i64 {
    24
}

fn default_example_window_days() -> i64 {
    7
}

fn default_queue_capacity() -> usize {
    16
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_weather_base_url")]
    pub base_url: String,
    #[serde(default = "default_unit_group")]
    pub unit_group: String,
}

impl Default for WeatherSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_weather_base_url(),
            unit_group: default_unit_group(),
        }
    }
}

fn default_weather_base_url() -> String {
    "https://weather.visualcrossing.com".to_string()
}

fn default_unit_group() -> String {
    "us".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptSettings {
    /// Prior high-quality feedback lines folded into a prompt; 0 disables the lookup.
    #[serde(default = "default_relevant_feedback_limit")]
    pub relevant_feedback_limit: i64,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            relevant_feedback_limit: default_relevant_feedback_limit(),
        }
    }
}

fn default_relevant_feedback_limit() -> i64 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::env;

    #[test]
    fn defaults_match_the_documented_constants() {
        let settings = Settings::default();
        assert_eq!(settings.provider.default_model, "gpt-3.5-turbo");
        assert_eq!(settings.provider.temperature, 0.7);
        assert_eq!(settings.provider.max_tokens, 1000);
        assert_eq!(settings.finetune.n_epochs, 2);
        assert_eq!(settings.finetune.high_quality_rating, 6);
        assert_eq!(settings.finetune.auto_trigger_threshold, 10);
        assert_eq!(settings.finetune.auto_trigger_window_hours, 24);
        assert_eq!(settings.finetune.min_examples, 10);
        assert_eq!(settings.finetune.example_window_days, 7);
        assert_eq!(settings.finetune.claim_window_secs, 0);
        assert_eq!(settings.fallback_label(), "gpt-3.5-turbo (fallback)");
    }

    #[test]
    fn partial_toml_keeps_defaults_for_missing_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("forensic.toml");
        std::fs::write(
            &path,
            r#"
            [provider]
            default_model = "gpt-4o-mini"

            [finetune]
            claim_window_secs = 3600
            "#,
        )
        .expect("write config");
        let settings = Settings::from_file(&path).expect("parse config");
        assert_eq!(settings.provider.default_model, "gpt-4o-mini");
        assert_eq!(settings.provider.max_tokens, 1000);
        assert_eq!(settings.finetune.claim_window_secs, 3600);
        assert_eq!(settings.finetune.base_model, "gpt-3.5-turbo");
    }

    #[test]
    fn malformed_toml_reports_the_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[provider\nmax_tokens = ").expect("write config");
        let err = Settings::from_file(&path).expect_err("should fail");
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut guard = env::guard();
        guard.remove("FORENSIC_CONFIG");
        guard.remove("FORENSIC_OPENAI_API_KEY");
        guard.set("OPENAI_API_KEY", "sk-env");
        guard.set("FORENSIC_AUTO_TRIGGER_THRESHOLD", "3");
        guard.set("FORENSIC_STATE_DIR", "/var/lib/forensic");
        let settings = Settings::load().expect("load");
        assert_eq!(settings.provider.api_key.as_deref(), Some("sk-env"));
        assert_eq!(settings.finetune.auto_trigger_threshold, 3);
        assert_eq!(settings.store.state_dir, PathBuf::from("/var/lib/forensic"));
    }

    #[test]
    fn invalid_numeric_env_is_rejected() {
        let mut guard = env::guard();
        guard.remove("FORENSIC_CONFIG");
        guard.set("FORENSIC_MAX_TOKENS", "lots");
        let err = Settings::load().expect_err("should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidEnv {
                key: "FORENSIC_MAX_TOKENS",
                ..
            }
        ));
    }
}
