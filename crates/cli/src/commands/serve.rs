//! `afina serve`: start the HTTP API server.

use afina_config::AppConfig;
use std::path::Path;

pub async fn run(config_path: &Path, port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config =
        AppConfig::load_with_env(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    if !config.has_api_key() {
        eprintln!("  Warning: no API key configured; model calls will fail.");
        eprintln!("  Set AFINA_API_KEY or add api_key to {}", config_path.display());
    }

    println!("Afina gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Uploads:   {}", config.uploads.dir.display());
    println!("   Origins:   {}", config.gateway.allowed_origins.join(", "));

    afina_gateway::start(config).await?;

    Ok(())
}
