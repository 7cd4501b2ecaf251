use async_trait::async_trait;
use forensic_kernel::Kernel;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
};
use tokio::sync::mpsc;

use crate::app_state::AppState;
use crate::config::Settings;
use crate::finetune::{FineTuneDispatcher, FineTuneRequest};
use crate::provider::{
    CompletionRequest, FineTuneJob, FineTuneJobRequest, ModelProvider, ProviderError,
};
use crate::weather::WeatherSource;

static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub(crate) mod env {
    use super::*;

    pub(crate) struct EnvGuard {
        _lock: MutexGuard<'static, ()>,
        saved: HashMap<String, Option<String>>,
    }

    pub(crate) fn guard() -> EnvGuard {
        EnvGuard {
            _lock: ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner()),
            saved: HashMap::new(),
        }
    }

    impl EnvGuard {
        fn remember(&mut self, key: &str) {
            self.saved
                .entry(key.to_string())
                .or_insert_with(|| std::env::var(key).ok());
        }

        pub(crate) fn set(&mut self, key: &str, value: impl AsRef<str>) {
            self.remember(key);
            std::env::set_var(key, value.as_ref());
        }

        pub(crate) fn remove(&mut self, key: &str) {
            self.remember(key);
            std::env::remove_var(key);
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain() {
                match value {
                    Some(val) => std::env::set_var(&key, val),
                    None => std::env::remove_var(&key),
                }
            }
        }
    }
}

/// In-memory provider that records every call.
pub(crate) struct FakeProvider {
    completion: String,
    fail_completions: AtomicBool,
    fail_fine_tune: AtomicBool,
    completions: Mutex<Vec<CompletionRequest>>,
    uploads: Mutex<Vec<(String, String)>>,
    jobs: Mutex<Vec<FineTuneJobRequest>>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self::with_completion("Generated section")
    }
}

impl FakeProvider {
    pub(crate) fn with_completion(text: &str) -> Self {
        Self {
            completion: text.to_string(),
            fail_completions: AtomicBool::new(false),
            fail_fine_tune: AtomicBool::new(false),
            completions: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            jobs: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn fail_completions(&self, fail: bool) {
        self.fail_completions.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_fine_tune(&self, fail: bool) {
        self.fail_fine_tune.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn completions(&self) -> Vec<CompletionRequest> {
        self.completions.lock().expect("completions lock").clone()
    }

    /// `(filename, jsonl)` per upload.
    pub(crate) fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.lock().expect("uploads lock").clone()
    }

    pub(crate) fn jobs(&self) -> Vec<FineTuneJobRequest> {
        self.jobs.lock().expect("jobs lock").clone()
    }

    fn failure(path: &str) -> ProviderError {
        ProviderError::Status {
            url: format!("http://fake{path}"),
            status: 500,
            body: "provider unavailable".into(),
        }
    }
}

#[async_trait]
impl ModelProvider for FakeProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        self.completions
            .lock()
            .expect("completions lock")
            .push(request.clone());
        if self.fail_completions.load(Ordering::SeqCst) {
            return Err(Self::failure("/v1/chat/completions"));
        }
        Ok(self.completion.clone())
    }

    async fn upload_training_file(
        &self,
        filename: &str,
        jsonl: Vec<u8>,
    ) -> Result<String, ProviderError> {
        let mut uploads = self.uploads.lock().expect("uploads lock");
        uploads.push((
            filename.to_string(),
            String::from_utf8_lossy(&jsonl).into_owned(),
        ));
        Ok(format!("file-test-{}", uploads.len()))
    }

    async fn create_fine_tune_job(
        &self,
        request: &FineTuneJobRequest,
    ) -> Result<FineTuneJob, ProviderError> {
        if self.fail_fine_tune.load(Ordering::SeqCst) {
            return Err(Self::failure("/v1/fine_tuning/jobs"));
        }
        let mut jobs = self.jobs.lock().expect("jobs lock");
        jobs.push(request.clone());
        Ok(FineTuneJob {
            id: format!("ftjob-test-{}", jobs.len()),
            object: Some("fine_tuning.job".into()),
            model: Some(request.model.clone()),
            status: Some("validating_files".into()),
            training_file: Some(request.training_file.clone()),
            created_at: Some(1_700_000_000),
            fine_tuned_model: None,
        })
    }
}

pub(crate) struct FakeWeather {
    response: Option<Value>,
    fail: bool,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeWeather {
    pub(crate) fn none() -> Self {
        Self {
            response: None,
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn returning(value: Value) -> Self {
        Self {
            response: Some(value),
            ..Self::none()
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::none()
        }
    }

    pub(crate) fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl WeatherSource for FakeWeather {
    async fn lookup(&self, location: &str, date: &str) -> anyhow::Result<Option<Value>> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((location.to_string(), date.to_string()));
        if self.fail {
            anyhow::bail!("weather service unavailable");
        }
        Ok(self.response.clone())
    }
}

/// Breaks the store underneath `state` so every read of `table` fails.
pub(crate) fn drop_table(state: &AppState, table: &str) {
    let conn = rusqlite::Connection::open(state.kernel().db_path()).expect("open store");
    conn.execute_batch(&format!("DROP TABLE {table}"))
        .expect("drop table");
}

/// State over a throwaway store. Keep the returned tempdir alive for the test's duration.
pub(crate) fn state_with(
    provider: Arc<FakeProvider>,
    tweak: impl FnOnce(&mut Settings),
) -> (AppState, mpsc::Receiver<FineTuneRequest>, tempfile::TempDir) {
    state_with_weather(provider, Arc::new(FakeWeather::none()), tweak)
}

pub(crate) fn state_with_weather(
    provider: Arc<FakeProvider>,
    weather: Arc<FakeWeather>,
    tweak: impl FnOnce(&mut Settings),
) -> (AppState, mpsc::Receiver<FineTuneRequest>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = Settings::default();
    settings.store.state_dir = dir.path().to_path_buf();
    tweak(&mut settings);
    let kernel = Kernel::open(&settings.store.state_dir).expect("open kernel");
    let (dispatcher, rx) = FineTuneDispatcher::channel(settings.finetune.queue_capacity);
    let state = AppState::builder(kernel, Arc::new(settings), dispatcher)
        .with_provider(provider)
        .with_weather(weather)
        .build();
    (state, rx, dir)
}
