use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use thumbnail_cache::ImageStorageConfig;
use tracing::info;

/// Layout of the CLI configuration file
///
/// ```toml
/// [storage]
/// root_dir = "/srv/www"
/// base_path = "https://www.example.com"
/// sizes = ["100x100", "640x480"]
/// default_namespace = "gallery"
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub storage: Option<ImageStorageConfig>,
}

/// Read the storage configuration at `path`, or fall back to defaults under the
/// user's home directory when the file does not exist
pub fn load(path: &Path) -> Result<ImageStorageConfig> {
    if !path.exists() {
        info!("Config file not found at {:?}, using defaults", path);
        return Ok(default_config());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
}

fn parse(content: &str) -> Result<ImageStorageConfig> {
    let file: ConfigFile = toml_edit::de::from_str(content)?;
    Ok(file.storage.unwrap_or_else(default_config))
}

fn default_config() -> ImageStorageConfig {
    let mut config = ImageStorageConfig::default();
    if let Some(home) = dirs::home_dir() {
        config.root_dir = home.join(".image-storage");
    }
    config
}
