//! Everything a turn needs, built once at startup.

use afina_config::{AppConfig, LimitsConfig, ModelRole};
use afina_core::error::{Error, Result};
use afina_core::event::EventBus;
use afina_core::tool::ToolRegistry;
use afina_files::{DefaultExtractor, FileCache, FsDocumentStore};
use afina_providers::ProviderRouter;
use std::sync::Arc;
use tracing::info;

use crate::model::ModelClient;

/// Model clients, tools, file cache and limits shared by all turns.
pub struct EngineContext {
    pub router: ModelClient,
    pub assistant: ModelClient,
    pub analyst: ModelClient,
    pub tools: Arc<ToolRegistry>,
    pub files: Arc<FileCache>,
    pub limits: LimitsConfig,
    pub event_bus: Arc<EventBus>,
}

fn model_client(providers: &ProviderRouter, role_name: &str, role: &ModelRole) -> Result<ModelClient> {
    let provider = providers
        .resolve(role.provider.as_deref())
        .ok_or_else(|| Error::Config {
            message: format!(
                "no provider {:?} for the {role_name} model (available: {})",
                role.provider.as_deref().unwrap_or("<default>"),
                providers.list().join(", ")
            ),
        })?;
    Ok(ModelClient::new(provider, &role.model, role.temperature))
}

impl EngineContext {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let providers = afina_providers::build_from_config(config);
        let router = model_client(&providers, "router", &config.models.router)?;
        let assistant = model_client(&providers, "assistant", &config.models.assistant)?;
        let analyst = model_client(&providers, "analyst", &config.models.analyst)?;

        let tools = afina_tools::default_registry(&config.search)?;
        let store = Arc::new(FsDocumentStore::new(config.uploads.dir.clone()));
        let files = Arc::new(FileCache::new(store, Arc::new(DefaultExtractor)));

        info!(
            router = router.model(),
            assistant = assistant.model(),
            analyst = analyst.model(),
            search = %config.search.provider,
            uploads = %config.uploads.dir.display(),
            "Engine context ready"
        );

        Ok(Self {
            router,
            assistant,
            analyst,
            tools: Arc::new(tools),
            files,
            limits: config.limits.clone(),
            event_bus: Arc::new(EventBus::default()),
        })
    }
}
