use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub server: ServerConfig,
    pub log_level: String,
    pub providers: ProvidersConfig,
    pub agents: AgentDefaults,
    pub storage: StorageConfig,
    pub tools: ToolsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            log_level: "info".into(),
            providers: ProvidersConfig::default(),
            agents: AgentDefaults::default(),
            storage: StorageConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Title reported by `/health` and `/docs`.
    pub title: String,
    pub version: String,
    /// Serve the route index at `/docs`.
    pub docs_enabled: bool,
    /// Allowed CORS origins. A single `"*"` allows any origin (without credentials).
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            title: "agentry".into(),
            version: "1.0".into(),
            docs_enabled: true,
            cors_origins: vec!["*".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersConfig {
    pub openai: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentDefaults {
    /// Model used when a request does not name one.
    pub model: String,
    pub debug_mode: bool,
    pub max_tool_iterations: u32,
    /// Sampling temperature. `None` leaves it to the provider.
    pub temperature: Option<f64>,
    pub max_tokens: u64,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            model: "gpt-4.1".into(),
            debug_mode: false,
            max_tool_iterations: 10,
            temperature: None,
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    /// SQLite database holding sessions, memories and knowledge chunks.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "~/.agentry/agentry.sqlite".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    pub timeout_secs: u64,
    pub hackernews: HackerNewsConfig,
    pub web: WebSearchConfig,
    pub finance: FinanceConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            hackernews: HackerNewsConfig::default(),
            web: WebSearchConfig::default(),
            finance: FinanceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HackerNewsConfig {
    pub api_base: String,
}

impl Default for HackerNewsConfig {
    fn default() -> Self {
        Self {
            api_base: "https://hacker-news.firebaseio.com/v0".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSearchConfig {
    pub max_results: u32,
    pub search_url: String,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            max_results: 5,
            search_url: "https://html.duckduckgo.com/html/".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FinanceConfig {
    pub api_base: String,
}

impl Default for FinanceConfig {
    fn default() -> Self {
        Self {
            api_base: "https://query1.finance.yahoo.com".into(),
        }
    }
}
