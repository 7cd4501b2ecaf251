use std::sync::Arc;

use forensic_kernel::Kernel;

use crate::config::Settings;
use crate::finetune::FineTuneDispatcher;
use crate::provider::{ModelProvider, OpenAiProvider};
use crate::weather::{VisualCrossing, WeatherSource};

#[derive(Clone)]
pub(crate) struct AppState {
    kernel: Kernel,
    settings: Arc<Settings>,
    provider: Arc<dyn ModelProvider>,
    weather: Arc<dyn WeatherSource>,
    finetune: FineTuneDispatcher,
}

impl AppState {
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn provider(&self) -> Arc<dyn ModelProvider> {
        self.provider.clone()
    }

    pub fn weather(&self) -> Arc<dyn WeatherSource> {
        self.weather.clone()
    }

    pub fn finetune(&self) -> &FineTuneDispatcher {
        &self.finetune
    }

    pub(crate) fn builder(
        kernel: Kernel,
        settings: Arc<Settings>,
        finetune: FineTuneDispatcher,
    ) -> AppStateBuilder {
        AppStateBuilder {
            kernel,
            settings,
            finetune,
            provider: None,
            weather: None,
        }
    }
}

pub(crate) struct AppStateBuilder {
    kernel: Kernel,
    settings: Arc<Settings>,
    finetune: FineTuneDispatcher,
    provider: Option<Arc<dyn ModelProvider>>,
    weather: Option<Arc<dyn WeatherSource>>,
}

impl AppStateBuilder {
    #[cfg(test)]
    pub(crate) fn with_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_weather(mut self, weather: Arc<dyn WeatherSource>) -> Self {
        self.weather = Some(weather);
        self
    }

    /// Missing collaborators default to the OpenAI and Visual Crossing clients.
    pub(crate) fn build(self) -> AppState {
        let provider = self.provider.unwrap_or_else(|| {
            Arc::new(OpenAiProvider::from_settings(&self.settings.provider))
        });
        let weather = self
            .weather
            .unwrap_or_else(|| Arc::new(VisualCrossing::from_settings(&self.settings.weather)));
        AppState {
            kernel: self.kernel,
            settings: self.settings,
            provider,
            weather,
            finetune: self.finetune,
        }
    }
}
