use crate::knowledge::KnowledgeSpec;

/// Static definition of an agent persona.
///
/// Values are never mutated after construction; per-run choices travel in [`RunOptions`].
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub agent_id: String,
    pub name: String,
    pub description: String,
    pub instructions: String,
    /// Tool set ids bound to the agent.
    pub toolsets: Vec<String>,
    pub model_id: String,
    /// Previous runs of the session replayed as chat history.
    pub history_runs: usize,
    pub table_prefix: String,
    pub enable_memory: bool,
    pub delete_memories: bool,
    pub clear_memories: bool,
    pub markdown: bool,
    pub show_tool_calls: bool,
    pub read_chat_history: bool,
    pub add_datetime: bool,
    pub knowledge: Option<KnowledgeSpec>,
    pub search_knowledge: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: String::new(),
            name: String::new(),
            description: String::new(),
            instructions: String::new(),
            toolsets: Vec::new(),
            model_id: "gpt-4.1".into(),
            history_runs: 3,
            table_prefix: String::new(),
            enable_memory: true,
            delete_memories: false,
            clear_memories: false,
            markdown: true,
            show_tool_calls: false,
            read_chat_history: true,
            add_datetime: true,
            knowledge: None,
            search_knowledge: false,
        }
    }
}

/// Per-request parameters for building an agent or team.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the persona's default model.
    pub model_id: Option<String>,
    pub user_id: Option<String>,
    /// A fresh session is started when absent.
    pub session_id: Option<String>,
    pub debug_mode: bool,
}

impl RunOptions {
    pub fn model_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.model_id
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(default)
    }

    /// The caller's session id, or a new one.
    pub fn session_or_new(&self) -> String {
        self.session_id
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    /// Same options with the session pinned, so team members share it.
    pub fn with_session(&self, session_id: &str) -> Self {
        Self {
            session_id: Some(session_id.to_string()),
            ..self.clone()
        }
    }
}
