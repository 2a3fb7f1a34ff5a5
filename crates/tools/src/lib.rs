//! Built-in tool implementations for Afina.
//!
//! The assistant has a single external capability, `search_web`. The HTTP
//! client it uses is built once from configuration and injected, so proxy
//! settings never leak into other outbound traffic.

pub mod web_search;

use afina_config::SearchConfig;
use afina_core::error::{Error, Result};
use afina_core::tool::ToolRegistry;
use std::sync::Arc;
use std::time::Duration;

pub use web_search::{
    BraveBackend, DuckDuckGoBackend, FailureKind, SearchBackend, SearchFailure, SearchHit,
    WebSearchTool, format_hits, sentinel,
};

/// Build the HTTP client used for search traffic.
pub fn build_http_client(config: &SearchConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(concat!("afina/", env!("CARGO_PKG_VERSION")));

    if let Some(proxy_url) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
        let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| Error::Config {
            message: format!("invalid search proxy {proxy_url:?}: {e}"),
        })?;
        tracing::info!(proxy = proxy_url, "Routing search traffic through proxy");
        builder = builder.proxy(proxy);
    }

    builder.build().map_err(|e| Error::Config {
        message: format!("failed to build search HTTP client: {e}"),
    })
}

/// Select the configured search backend.
pub fn build_backend(
    config: &SearchConfig,
    client: reqwest::Client,
) -> Result<Arc<dyn SearchBackend>> {
    match config.provider.to_lowercase().as_str() {
        "duckduckgo" | "" => Ok(Arc::new(DuckDuckGoBackend::new(client, &config.region))),
        "brave" => {
            let key = config
                .api_key
                .as_deref()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| Error::Config {
                    message: "search.provider = \"brave\" requires search.api_key".into(),
                })?;
            Ok(Arc::new(BraveBackend::new(client, key)))
        }
        other => Err(Error::Config {
            message: format!("unknown search provider {other:?} (expected duckduckgo or brave)"),
        }),
    }
}

/// Create the tool registry offered to the assistant.
pub fn default_registry(config: &SearchConfig) -> Result<ToolRegistry> {
    let client = build_http_client(config)?;
    let backend = build_backend(config, client)?;

    let mut registry = ToolRegistry::new();
    registry.register(Box::new(WebSearchTool::new(backend, config.max_results)));
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_search_web() {
        let registry = default_registry(&SearchConfig::default()).unwrap();
        assert_eq!(registry.names(), vec!["search_web"]);
    }

    #[test]
    fn brave_requires_key() {
        let mut config = SearchConfig::default();
        config.provider = "brave".into();
        assert!(default_registry(&config).is_err());

        config.api_key = Some("brv-test".into());
        assert!(default_registry(&config).is_ok());
    }

    #[test]
    fn unknown_provider_rejected() {
        let mut config = SearchConfig::default();
        config.provider = "altavista".into();
        let err = default_registry(&config).err().unwrap();
        assert!(err.to_string().contains("altavista"));
    }

    #[test]
    fn proxy_is_validated() {
        let mut config = SearchConfig::default();
        config.proxy = Some("http://127.0.0.1:3128".into());
        assert!(build_http_client(&config).is_ok());
    }
}
