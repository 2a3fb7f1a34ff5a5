//! `afina init`: write a default config file.

use afina_config::AppConfig;
use std::path::Path;

pub fn run(config_path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if config_path.exists() && !force {
        println!("Config already exists at: {}", config_path.display());
        println!("   Edit it manually or re-run with --force.");
        return Ok(());
    }

    write_default(config_path)?;
    println!("Created config at: {}", config_path.display());
    println!("\nNext steps:");
    println!("   1. Add your API key (or set AFINA_API_KEY)");
    println!("   2. Run: afina serve");

    Ok(())
}

fn write_default(config_path: &Path) -> std::io::Result<()> {
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(config_path, AppConfig::default_toml())
}
