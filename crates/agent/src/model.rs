//! Model clients: a provider bound to a model name and temperature.

use afina_core::error::ProviderError;
use afina_core::message::Message;
use afina_core::provider::{ChunkReceiver, Provider, ProviderRequest, ProviderResponse};
use std::sync::Arc;

/// One model role (router, assistant or analyst), built once at startup.
#[derive(Clone)]
pub struct ModelClient {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
}

impl ModelClient {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// A request for this model with the client's temperature.
    pub fn request(&self, messages: Vec<Message>) -> ProviderRequest {
        ProviderRequest::new(&self.model, self.temperature, messages)
    }

    pub async fn complete(
        &self,
        request: ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        self.provider.complete(request).await
    }

    pub async fn stream(&self, mut request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        request.stream = true;
        self.provider.stream(request).await
    }
}

impl std::fmt::Debug for ModelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelClient")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}
