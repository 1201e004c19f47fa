use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::{Config, ProviderConfig};

/// Resolve a configured path, expanding ~ to the home directory.
pub fn resolve_path(path: &str) -> PathBuf {
    if path.starts_with("~/") || path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home.join(path.strip_prefix("~/").unwrap_or(""));
        }
    }
    PathBuf::from(path)
}

/// Find the config file by searching standard locations.
pub fn find_config_path() -> PathBuf {
    // 1. Current directory
    let local = Path::new("agentry.json");
    if local.exists() {
        return local.to_path_buf();
    }

    // 2. ~/.agentry/config.json
    if let Some(home) = dirs::home_dir() {
        let home_config = home.join(".agentry").join("config.json");
        if home_config.exists() {
            return home_config;
        }
    }

    // Default: ~/.agentry/config.json (will use defaults if missing)
    dirs::home_dir()
        .map(|h| h.join(".agentry").join("config.json"))
        .unwrap_or_else(|| PathBuf::from("agentry.json"))
}

/// Load configuration from a JSON file.
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config '{}'", path.display()))?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config '{}'", path.display()))?;
        Ok(config)
    } else {
        Ok(Config::default())
    }
}

/// Save configuration to a JSON file.
pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    let contents = serde_json::to_string_pretty(config)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create config directory '{}'",
                parent.to_string_lossy()
            )
        })?;
    }
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write config '{}'", path.display()))?;
    Ok(())
}

/// Load `.env` (if present) and then the config file, with environment overrides applied.
pub fn load_with_env(path: &Path) -> Result<Config> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e).context("failed to load .env");
        }
    }
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

/// Apply process-level settings taken from the environment.
///
/// `lookup` is injected so tests don't have to touch the real process environment.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(level) = get("LOG_LEVEL") {
        config.log_level = level.to_lowercase();
    }
    if let Some(origins) = get("CORS_ORIGINS") {
        config.server.cors_origins = origins
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
    }
    if let Some(title) = get("API_TITLE") {
        config.server.title = title;
    }
    if let Some(version) = get("API_VERSION") {
        config.server.version = version;
    }
    if let Some(docs) = get("DOCS_ENABLED") {
        config.server.docs_enabled = parse_bool(&docs)
            .with_context(|| format!("DOCS_ENABLED must be a boolean, got '{docs}'"))?;
    }
    if let Some(host) = get("AGENTRY_HOST") {
        config.server.host = host;
    }
    if let Some(port) = get("AGENTRY_PORT") {
        config.server.port = port
            .parse()
            .with_context(|| format!("AGENTRY_PORT must be a port number, got '{port}'"))?;
    }
    if let Some(path) = get("AGENTRY_DB_PATH") {
        config.storage.path = path;
    }

    let key = get("OPENAI_API_KEY");
    let base = get("OPENAI_BASE_URL");
    if key.is_some() || base.is_some() {
        let openai = config
            .providers
            .openai
            .get_or_insert_with(ProviderConfig::default);
        // Values from the config file win over the environment for the key.
        if openai.api_key.as_deref().unwrap_or("").is_empty() {
            openai.api_key = key;
        }
        if base.is_some() {
            openai.api_base = base;
        }
    }

    Ok(())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
