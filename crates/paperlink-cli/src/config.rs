//! Configuration loading from TOML files

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use paperlink_consolidate::Config;

/// Environment variable used for the Semantic Scholar key when the file sets none
const S2_API_KEY_ENV: &str = "S2_API_KEY";
/// Environment variable used for the OpenAlex polite-pool address
const OPENALEX_MAILTO_ENV: &str = "OPENALEX_MAILTO";

/// Load configuration from default locations
///
/// Search order:
/// 1. ./paperlink.toml (current directory)
/// 2. ~/.config/paperlink/config.toml
///
/// If no config file found, returns default config.
pub fn load() -> Result<Config> {
    let local_config = PathBuf::from("paperlink.toml");
    if local_config.exists() {
        return from_file(&local_config);
    }

    if let Some(dirs) = directories::ProjectDirs::from("", "", "paperlink") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            return from_file(&user_config);
        }
    }

    log::debug!("No config file found, using defaults");
    Ok(with_env_defaults(Config::default()))
}

/// Load configuration from a specific file
pub fn from_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config = parse(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    log::info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Parse TOML text, expanding `${VAR}` string values from the environment.
fn parse(content: &str) -> Result<Config> {
    let mut value: toml::Value = toml::from_str(content)?;
    expand_env_vars(&mut value);
    let config: Config = value.try_into()?;
    Ok(with_env_defaults(config))
}

/// Fill credentials the file left unset from the environment.
fn with_env_defaults(mut config: Config) -> Config {
    if config.sources.semantic_scholar.api_key.is_none() {
        config.sources.semantic_scholar.api_key = std::env::var(S2_API_KEY_ENV).ok();
    }
    if config.sources.openalex.mailto.is_none() {
        config.sources.openalex.mailto = std::env::var(OPENALEX_MAILTO_ENV).ok();
    }
    config
}

/// Expand every string value of the form `${VAR}` in place.
///
/// Unset variables are left as written; source settings validation rejects
/// them with the variable name.
fn expand_env_vars(value: &mut toml::Value) {
    match value {
        toml::Value::String(s) => {
            if let Some(expanded) = expand_env_var(s) {
                *s = expanded;
            }
        }
        toml::Value::Array(items) => items.iter_mut().for_each(expand_env_vars),
        toml::Value::Table(table) => table.iter_mut().for_each(|(_, v)| expand_env_vars(v)),
        _ => {}
    }
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    let var_name = s.strip_prefix("${").and_then(|s| s.strip_suffix('}'))?;
    std::env::var(var_name).ok()
}
