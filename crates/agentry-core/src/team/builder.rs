use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{Team, TeamConfig, TeamMode};
use crate::agent::{LoopSettings, RunOptions};
use crate::registry::Catalog;

const TEAM_SESSIONS_TABLE: &str = "team_sessions";

/// Factory registered for every built-in team.
pub fn build_team(cfg: &TeamConfig, opts: &RunOptions, catalog: &Catalog) -> Result<Team> {
    TeamBuilder::new(cfg, opts, catalog).build()
}

/// What the leader is told about each member.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub id: String,
    pub name: String,
    pub role: String,
    pub tools: Vec<String>,
}

pub struct TeamBuilder<'a> {
    cfg: &'a TeamConfig,
    opts: &'a RunOptions,
    catalog: &'a Catalog,
}

impl<'a> TeamBuilder<'a> {
    pub fn new(cfg: &'a TeamConfig, opts: &'a RunOptions, catalog: &'a Catalog) -> Self {
        Self { cfg, opts, catalog }
    }

    pub fn build(self) -> Result<Team> {
        let cfg = self.cfg;
        let rt = self.catalog.runtime();

        let model_name = self.opts.model_or(&cfg.model_id).to_string();
        let leader = rt
            .models
            .create(&model_name)
            .with_context(|| format!("creating leader model '{model_name}'"))?;
        let session_id = self.opts.session_or_new();

        // Members share the team's session and model.
        let mut member_opts = self.opts.with_session(&session_id);
        member_opts.model_id = Some(model_name.clone());
        let mut members = Vec::with_capacity(cfg.members.len());
        for id in &cfg.members {
            let agent = self
                .catalog
                .get_agent(id, &member_opts)
                .with_context(|| format!("building member '{id}' of team '{}'", cfg.team_id))?;
            members.push(Arc::new(agent));
        }

        let infos: Vec<MemberInfo> = members
            .iter()
            .map(|m| MemberInfo {
                id: m.id().to_string(),
                name: m.name().to_string(),
                role: m
                    .config()
                    .description
                    .lines()
                    .find(|l| !l.trim().is_empty())
                    .unwrap_or_default()
                    .trim()
                    .to_string(),
                tools: m.tool_names().into_iter().map(str::to_string).collect(),
            })
            .collect();
        let system_prompt = leader_prompt(cfg, &infos, Utc::now());

        debug!(
            "Built team '{}' ({} mode, model {model_name}, session {session_id}, members {:?})",
            cfg.team_id, cfg.mode, cfg.members
        );

        Ok(Team {
            config: cfg.clone(),
            leader,
            model_name,
            overrides: rt.overrides.clone(),
            members,
            system_prompt,
            sessions: rt.sessions(TEAM_SESSIONS_TABLE)?,
            user_id: self.opts.user_id.clone().filter(|u| !u.is_empty()),
            session_id,
            settings: LoopSettings {
                max_iterations: rt.config.agents.max_tool_iterations.max(1) as usize,
                temperature: rt.config.agents.temperature,
                max_tokens: rt.config.agents.max_tokens,
                debug_mode: self.opts.debug_mode || rt.config.agents.debug_mode,
            },
        })
    }
}

fn how_to_respond(mode: TeamMode) -> &'static str {
    match mode {
        TeamMode::Route => {
            "- Pick the single member best suited to the request and forward it with `forward_task_to_member`.\n\
             - The member's answer goes to the user unchanged.\n\
             - Answer directly only when no member fits, such as greetings or questions about the team itself."
        }
        TeamMode::Coordinate => {
            "- Break the request into tasks and transfer each one with `transfer_task_to_member`.\n\
             - Give every task a clear description and the output you expect.\n\
             - You may call members several times and build on earlier answers.\n\
             - When you have what you need, write the final answer yourself."
        }
        TeamMode::Collaborate => {
            "- Every member has already answered the request. Their answers follow the user's message.\n\
             - Combine them into one consistent answer and resolve any disagreement between them."
        }
    }
}

/// Assemble the leader's system prompt.
pub fn leader_prompt(cfg: &TeamConfig, members: &[MemberInfo], now: DateTime<Utc>) -> String {
    let mut prompt = format!("You are the leader of a team of AI agents called {}.", cfg.name);
    let description = cfg.description.trim();
    if !description.is_empty() {
        prompt.push(' ');
        prompt.push_str(description);
    }
    prompt.push_str("\n\n<team_members>\n");
    for (i, m) in members.iter().enumerate() {
        prompt.push_str(&format!(" - Agent {}:\n   - ID: {}\n   - Name: {}\n", i + 1, m.id, m.name));
        if !m.role.is_empty() {
            prompt.push_str(&format!("   - Role: {}\n", m.role));
        }
        if !m.tools.is_empty() {
            prompt.push_str(&format!("   - Tools: {}\n", m.tools.join(", ")));
        }
    }
    prompt.push_str("</team_members>\n\n<how_to_respond>\n");
    prompt.push_str(how_to_respond(cfg.mode));
    prompt.push_str("\n</how_to_respond>\n\n");

    let instructions: Vec<&str> = cfg
        .instructions
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    if !instructions.is_empty() {
        prompt.push_str("<instructions>\n");
        for line in instructions {
            prompt.push_str(&format!("- {line}\n"));
        }
        prompt.push_str("</instructions>\n\n");
    }

    prompt.push_str("<additional_information>\n");
    if cfg.markdown {
        prompt.push_str("- Use markdown to format your answers.\n");
    }
    prompt.push_str(&format!(
        "- The current time is {}.\n</additional_information>",
        now.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    prompt
}
