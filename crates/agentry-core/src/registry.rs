//! Discovery and lookup of agents, teams and tool sets.
//!
//! Registration tables are static. Discovery validates them once at startup;
//! instantiation happens per request through [`Catalog`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agentry_config::{resolve_path, Config};
use anyhow::Result;
use tracing::{error, info};

use crate::agent::{Agent, AgentConfig, RunOptions};
use crate::error::CatalogError;
use crate::knowledge::{KnowledgeBase, KnowledgeSpec, LoadReport};
use crate::model::{ModelFactory, ModelOverrides};
use crate::storage::{Database, MemoryStore, SessionStore};
use crate::team::{Team, TeamConfig};
use crate::tools::{Tool, ToolDeps, ToolsetRegistration};

/// Knowledge downloads get more time than a single tool call.
const KNOWLEDGE_TIMEOUT_FACTOR: u64 = 6;

/// Process-wide resources shared by every agent and team built from the catalog.
#[derive(Clone)]
pub struct Runtime {
    pub config: Arc<Config>,
    pub models: ModelFactory,
    pub overrides: ModelOverrides,
    pub db: Arc<Database>,
    pub http: reqwest::Client,
}

impl Runtime {
    /// Open the database named in the config.
    pub fn new(config: Config) -> Result<Self> {
        let path = resolve_path(&config.storage.path);
        let db = Database::open(&path)?;
        info!("Storage at {}", path.display());
        Ok(Self::with_database(config, db))
    }

    /// Runtime over a throwaway in-memory database. The configured storage
    /// file is never opened, which is all listing the catalog needs.
    pub fn in_memory(config: Config) -> Result<Self> {
        Ok(Self::with_database(config, Database::open_in_memory()?))
    }

    pub fn with_database(config: Config, db: Database) -> Self {
        let config = Arc::new(config);
        Self {
            models: ModelFactory::new(config.clone()),
            overrides: ModelOverrides::defaults(),
            db: Arc::new(db),
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn tool_deps(&self) -> ToolDeps {
        ToolDeps::new(self.http.clone(), self.config.tools.clone())
    }

    pub fn sessions(&self, table: &str) -> Result<SessionStore> {
        SessionStore::new(self.db.clone(), table)
    }

    pub fn memories(&self) -> Result<MemoryStore> {
        MemoryStore::new(self.db.clone())
    }

    pub fn knowledge_base(&self, spec: KnowledgeSpec) -> Result<KnowledgeBase> {
        let timeout =
            Duration::from_secs(self.config.tools.timeout_secs.max(1) * KNOWLEDGE_TIMEOUT_FACTOR);
        KnowledgeBase::new(self.db.clone(), self.http.clone(), spec, timeout)
    }
}

pub type AgentFactory = fn(&AgentConfig, &RunOptions, &Catalog) -> Result<Agent>;
pub type TeamFactory = fn(&TeamConfig, &RunOptions, &Catalog) -> Result<Team>;

#[derive(Clone)]
pub struct AgentRegistration {
    pub config: AgentConfig,
    pub build: AgentFactory,
}

impl AgentRegistration {
    pub fn new(config: AgentConfig, build: AgentFactory) -> Self {
        Self { config, build }
    }
}

#[derive(Clone)]
pub struct TeamRegistration {
    pub config: TeamConfig,
    pub build: TeamFactory,
}

impl TeamRegistration {
    pub fn new(config: TeamConfig, build: TeamFactory) -> Self {
        Self { config, build }
    }
}

/// Anything discoverable by id.
pub trait Registered {
    fn id(&self) -> &str;
}

impl Registered for AgentRegistration {
    fn id(&self) -> &str {
        &self.config.agent_id
    }
}

impl Registered for TeamRegistration {
    fn id(&self) -> &str {
        &self.config.team_id
    }
}

impl Registered for ToolsetRegistration {
    fn id(&self) -> &str {
        self.config.tool_id
    }
}

/// Ordered id -> registration map built by discovery.
pub struct Registry<R> {
    entries: Vec<R>,
    index: HashMap<String, usize>,
}

impl<R: Registered> Registry<R> {
    /// Keep valid entries in order. Empty ids and failed checks are skipped,
    /// and for duplicate ids the first registration wins.
    fn discover(
        kind: &'static str,
        candidates: Vec<R>,
        check: impl Fn(&R) -> Result<()>,
    ) -> Self {
        let mut entries = Vec::with_capacity(candidates.len());
        let mut index = HashMap::new();
        for candidate in candidates {
            let id = candidate.id().trim().to_string();
            if id.is_empty() {
                error!("Skipping {kind} with an empty id");
                continue;
            }
            if index.contains_key(&id) {
                error!("Duplicate {kind} id '{id}'; keeping the first registration");
                continue;
            }
            if let Err(e) = check(&candidate) {
                error!("Skipping {kind} '{id}': {e:#}");
                continue;
            }
            index.insert(id, entries.len());
            entries.push(candidate);
        }
        let ids: Vec<&str> = entries.iter().map(|e| e.id()).collect();
        info!("{kind} discovery complete. Registered {kind}s: {ids:?}");
        Self { entries, index }
    }

    pub fn get(&self, id: &str) -> Option<&R> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.id().to_string()).collect()
    }

}

pub type AgentRegistry = Registry<AgentRegistration>;
pub type TeamRegistry = Registry<TeamRegistration>;
pub type ToolsetRegistry = Registry<ToolsetRegistration>;

/// Every registered agent, team and tool set plus the runtime needed to build them.
pub struct Catalog {
    toolsets: ToolsetRegistry,
    agents: AgentRegistry,
    teams: TeamRegistry,
    runtime: Runtime,
}

impl Catalog {
    /// Discover the built-in registrations.
    pub fn builtin(runtime: Runtime) -> Self {
        Self::discover(
            runtime,
            crate::tools::builtin(),
            crate::agents::builtin(),
            crate::teams::builtin(),
        )
    }

    /// Discover tool sets, then agents (whose tool sets must exist), then teams
    /// (whose members must be registered agents).
    pub fn discover(
        runtime: Runtime,
        toolsets: Vec<ToolsetRegistration>,
        agents: Vec<AgentRegistration>,
        teams: Vec<TeamRegistration>,
    ) -> Self {
        let toolsets = Registry::discover("toolset", toolsets, |_: &ToolsetRegistration| Ok(()));
        let agents = Registry::discover("agent", agents, |a: &AgentRegistration| {
            if let Some(missing) = a.config.toolsets.iter().find(|t| !toolsets.contains(t)) {
                anyhow::bail!("unknown toolset '{missing}'");
            }
            if let Some(ref k) = a.config.knowledge {
                crate::storage::validate_table_name(&k.table_name)?;
            }
            Ok(())
        });
        let teams = Registry::discover("team", teams, |t: &TeamRegistration| {
            if t.config.members.is_empty() {
                anyhow::bail!("team has no members");
            }
            if let Some(missing) = t.config.members.iter().find(|m| !agents.contains(m)) {
                anyhow::bail!("unknown member agent '{missing}'");
            }
            Ok(())
        });
        Self {
            toolsets,
            agents,
            teams,
            runtime,
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn available_agents(&self) -> Vec<String> {
        self.agents.ids()
    }

    pub fn available_teams(&self) -> Vec<String> {
        self.teams.ids()
    }

    pub fn available_toolsets(&self) -> Vec<String> {
        self.toolsets.ids()
    }

    pub fn agent_config(&self, agent_id: &str) -> Option<&AgentConfig> {
        self.agents.get(agent_id).map(|r| &r.config)
    }

    pub fn team_config(&self, team_id: &str) -> Option<&TeamConfig> {
        self.teams.get(team_id).map(|r| &r.config)
    }

    pub fn toolset_config(&self, tool_id: &str) -> Option<&crate::tools::ToolsetConfig> {
        self.toolsets.get(tool_id).map(|r| &r.config)
    }

    /// Build a fresh agent for one request.
    pub fn get_agent(&self, agent_id: &str, opts: &RunOptions) -> Result<Agent, CatalogError> {
        let reg = self
            .agents
            .get(agent_id)
            .ok_or_else(|| CatalogError::UnknownAgent {
                id: agent_id.to_string(),
                available: self.available_agents(),
            })?;
        (reg.build)(&reg.config, opts, self).map_err(|e| CatalogError::build("agent", agent_id, e))
    }

    /// Build a fresh team (and its members) for one request.
    pub fn get_team(&self, team_id: &str, opts: &RunOptions) -> Result<Team, CatalogError> {
        let reg = self
            .teams
            .get(team_id)
            .ok_or_else(|| CatalogError::UnknownTeam {
                id: team_id.to_string(),
                available: self.available_teams(),
            })?;
        (reg.build)(&reg.config, opts, self).map_err(|e| CatalogError::build("team", team_id, e))
    }

    /// Instantiate the tools of one tool set.
    pub fn get_tools(&self, tool_id: &str) -> Result<Vec<Box<dyn Tool>>, CatalogError> {
        let reg = self
            .toolsets
            .get(tool_id)
            .ok_or_else(|| CatalogError::UnknownToolset {
                id: tool_id.to_string(),
                available: self.available_toolsets(),
            })?;
        (reg.build)(&self.runtime.tool_deps())
            .map_err(|e| CatalogError::build("toolset", tool_id, e))
    }

    /// Fetch and index the knowledge sources of an agent.
    pub async fn load_knowledge(
        &self,
        agent_id: &str,
        upsert: bool,
    ) -> Result<LoadReport, CatalogError> {
        let cfg = self
            .agent_config(agent_id)
            .ok_or_else(|| CatalogError::UnknownAgent {
                id: agent_id.to_string(),
                available: self.available_agents(),
            })?;
        let spec = cfg.knowledge.clone().ok_or_else(|| CatalogError::NoKnowledge {
            id: agent_id.to_string(),
        })?;
        let knowledge_error = |e: anyhow::Error| CatalogError::Knowledge {
            id: agent_id.to_string(),
            reason: format!("{e:#}"),
        };
        let kb = self.runtime.knowledge_base(spec).map_err(knowledge_error)?;
        kb.load(upsert).await.map_err(knowledge_error)
    }
}
