pub mod loader;
pub mod schema;

pub use loader::{
    apply_env_overrides, find_config_path, load_config, load_with_env, resolve_path, save_config,
};
pub use schema::{
    AgentDefaults, Config, FinanceConfig, HackerNewsConfig, ProviderConfig, ProvidersConfig,
    ServerConfig, StorageConfig, ToolsConfig, WebSearchConfig,
};
