use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{Agent, AgentConfig, LoopSettings, RunOptions};
use crate::registry::Catalog;
use crate::storage::{SessionStore, UserMemory};
use crate::tools::history::ChatHistoryTool;
use crate::tools::knowledge::SearchKnowledgeTool;
use crate::tools::memory::user_memory_tools;
use crate::tools::ToolRegistry;

/// Factory registered for every built-in persona.
pub fn build_agent(cfg: &AgentConfig, opts: &RunOptions, catalog: &Catalog) -> Result<Agent> {
    AgentBuilder::new(cfg, opts, catalog).build()
}

/// Turns an [`AgentConfig`] plus per-run options into a runnable [`Agent`].
pub struct AgentBuilder<'a> {
    cfg: &'a AgentConfig,
    opts: &'a RunOptions,
    catalog: &'a Catalog,
}

impl<'a> AgentBuilder<'a> {
    pub fn new(cfg: &'a AgentConfig, opts: &'a RunOptions, catalog: &'a Catalog) -> Self {
        Self { cfg, opts, catalog }
    }

    pub fn build(self) -> Result<Agent> {
        let cfg = self.cfg;
        let rt = self.catalog.runtime();

        let model_name = self.opts.model_or(&cfg.model_id).to_string();
        let model = rt
            .models
            .create(&model_name)
            .with_context(|| format!("creating model '{model_name}'"))?;

        let session_id = self.opts.session_or_new();
        let user_id = self.opts.user_id.clone().filter(|u| !u.is_empty());
        let sessions = rt.sessions(&SessionStore::table_for(&cfg.table_prefix))?;

        let mut tools = ToolRegistry::new();
        for toolset in &cfg.toolsets {
            tools.extend(self.catalog.get_tools(toolset)?);
        }
        if cfg.read_chat_history {
            tools.register(Box::new(ChatHistoryTool::new(
                sessions.clone(),
                &cfg.agent_id,
                &session_id,
            )));
        }

        let mut memories = Vec::new();
        if cfg.enable_memory {
            if let Some(ref user) = user_id {
                let store = rt.memories()?;
                memories = store.list(user)?;
                tools.extend(user_memory_tools(
                    store,
                    user,
                    cfg.delete_memories,
                    cfg.clear_memories,
                ));
            }
        }

        if cfg.search_knowledge {
            if let Some(ref spec) = cfg.knowledge {
                let kb = rt.knowledge_base(spec.clone())?;
                tools.register(Box::new(SearchKnowledgeTool::new(Arc::new(kb))));
            }
        }

        let system_prompt = system_prompt(cfg, user_id.as_deref(), &memories, Utc::now());
        let debug_mode = self.opts.debug_mode || rt.config.agents.debug_mode;
        debug!(
            "Built agent '{}' (model {model_name}, session {session_id}, tools: {:?})",
            cfg.agent_id,
            tools.names()
        );

        Ok(Agent {
            config: cfg.clone(),
            model,
            model_name,
            overrides: rt.overrides.clone(),
            tools,
            system_prompt,
            sessions,
            user_id,
            session_id,
            settings: LoopSettings {
                max_iterations: rt.config.agents.max_tool_iterations.max(1) as usize,
                temperature: rt.config.agents.temperature,
                max_tokens: rt.config.agents.max_tokens,
                debug_mode,
            },
        })
    }
}

/// Assemble the system prompt for an agent.
pub fn system_prompt(
    cfg: &AgentConfig,
    user_id: Option<&str>,
    memories: &[UserMemory],
    now: DateTime<Utc>,
) -> String {
    let mut prompt = String::new();
    let description = cfg.description.trim();
    if !description.is_empty() {
        prompt.push_str(description);
        prompt.push_str("\n\n");
    }

    let instructions = cfg
        .instructions
        .replace("{current_user_id}", user_id.unwrap_or("unknown"));
    let instructions = instructions.trim();
    if !instructions.is_empty() {
        prompt.push_str("<instructions>\n");
        prompt.push_str(instructions);
        prompt.push_str("\n</instructions>\n\n");
    }

    let mut extra = Vec::new();
    if cfg.markdown {
        extra.push("Use markdown to format your answers.".to_string());
    }
    if cfg.add_datetime {
        extra.push(format!(
            "The current time is {}.",
            now.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    if cfg.search_knowledge && cfg.knowledge.is_some() {
        extra.push(
            "Search your knowledge base with `search_knowledge_base` before answering questions it may cover."
                .to_string(),
        );
    }
    if !extra.is_empty() {
        prompt.push_str("<additional_information>\n");
        for line in extra {
            prompt.push_str(&format!("- {line}\n"));
        }
        prompt.push_str("</additional_information>\n\n");
    }

    if cfg.enable_memory && user_id.is_some() {
        prompt.push_str("<memories_from_previous_interactions>\n");
        if memories.is_empty() {
            prompt.push_str("- (none yet)\n");
        }
        for m in memories {
            prompt.push_str(&format!("- {} (memory_id: {})\n", m.memory, m.memory_id));
        }
        prompt.push_str("</memories_from_previous_interactions>\n");
        prompt.push_str(
            "Save new durable facts about the user with `update_user_memory`.\n",
        );
    }

    prompt.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn cfg() -> AgentConfig {
        AgentConfig {
            agent_id: "hacker_news_agent".into(),
            name: "HackerNews Researcher".into(),
            description: "You research Hacker News.".into(),
            instructions: "Help the user.\nYou are interacting with user_id: {current_user_id}".into(),
            ..Default::default()
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap()
    }

    #[test]
    fn substitutes_user_and_adds_context() {
        let memories = vec![UserMemory {
            memory_id: "m1".into(),
            user_id: "ada".into(),
            memory: "Prefers Rust".into(),
            created_at: String::new(),
        }];
        let prompt = system_prompt(&cfg(), Some("ada"), &memories, now());
        assert!(prompt.starts_with("You research Hacker News."));
        assert!(prompt.contains("user_id: ada"));
        assert!(!prompt.contains("{current_user_id}"));
        assert!(prompt.contains("Use markdown"));
        assert!(prompt.contains("2025-03-01 12:30:00 UTC"));
        assert!(prompt.contains("- Prefers Rust (memory_id: m1)"));
    }

    #[test]
    fn anonymous_runs_have_no_memory_block() {
        let mut cfg = cfg();
        cfg.markdown = false;
        cfg.add_datetime = false;
        let prompt = system_prompt(&cfg, None, &[], now());
        assert!(prompt.contains("user_id: unknown"));
        assert!(!prompt.contains("memories_from_previous_interactions"));
        assert!(!prompt.contains("additional_information"));
    }
}
