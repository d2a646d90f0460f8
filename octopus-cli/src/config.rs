//! Scripting configuration file loading

use anyhow::{bail, Context, Result};
use octopus_scripting::ScriptingConfig;
use std::fs;
use std::path::Path;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format
    Yaml,
    /// TOML format
    Toml,
    /// JSON format
    Json,
}

impl ConfigFormat {
    /// Detect format from file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Ok(Self::Yaml),
            Some("toml") => Ok(Self::Toml),
            Some("json") => Ok(Self::Json),
            Some(ext) => bail!("Unsupported config format: {ext}"),
            None => bail!("Config file has no extension: {}", path.display()),
        }
    }
}

/// Load a scripting configuration, or the defaults when no file is given
pub fn load(path: Option<&Path>) -> Result<ScriptingConfig> {
    let Some(path) = path else {
        return Ok(ScriptingConfig::default());
    };

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config = parse(&content, ConfigFormat::from_path(path)?)?;
    config.validate()?;
    Ok(config)
}

/// Parse a scripting configuration
pub fn parse(content: &str, format: ConfigFormat) -> Result<ScriptingConfig> {
    let config = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(content).context("Failed to parse YAML")?,
        ConfigFormat::Toml => toml::from_str(content).context("Failed to parse TOML")?,
        ConfigFormat::Json => serde_json::from_str(content).context("Failed to parse JSON")?,
    };
    Ok(config)
}
