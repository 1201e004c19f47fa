//! Teams: a leader model that answers by delegating to member agents.

pub mod builder;
mod members;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::completion::{CompletionModel, CompletionRequest, Message};
use rig::message::AssistantContent;
use rig::OneOrMany;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub use builder::{build_team, leader_prompt, MemberInfo, TeamBuilder};

use crate::agent::r#loop::{emit, format_tool_call, user_text, assistant_text};
use crate::agent::{Agent, LoopSettings, RunEvent, RunResponse, ToolLoop};
use crate::model::ModelOverrides;
use crate::storage::SessionStore;
use crate::tools::ToolRegistry;
use members::{forward_definition, push_response, Collected, TransferTaskTool, FORWARD_TOOL};

/// Team runs replay this many previous runs of the session.
const TEAM_HISTORY_RUNS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamMode {
    /// The leader picks one member, whose answer is returned directly.
    Route,
    /// The leader delegates sub-tasks and writes the final answer.
    Coordinate,
    /// Every member answers, then the leader combines the answers.
    Collaborate,
}

impl fmt::Display for TeamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Route => "route",
            Self::Coordinate => "coordinate",
            Self::Collaborate => "collaborate",
        })
    }
}

impl FromStr for TeamMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "route" => Ok(Self::Route),
            "coordinate" => Ok(Self::Coordinate),
            "collaborate" => Ok(Self::Collaborate),
            other => anyhow::bail!("unknown team mode '{other}' (expected route, coordinate or collaborate)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TeamConfig {
    pub team_id: String,
    pub name: String,
    pub description: String,
    pub instructions: Vec<String>,
    pub mode: TeamMode,
    /// Member agent ids, resolved through the agent registry.
    pub members: Vec<String>,
    pub model_id: String,
    pub markdown: bool,
    pub show_tool_calls: bool,
    pub show_members_responses: bool,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            team_id: String::new(),
            name: String::new(),
            description: String::new(),
            instructions: Vec::new(),
            mode: TeamMode::Coordinate,
            members: Vec::new(),
            model_id: "gpt-4.1".into(),
            markdown: true,
            show_tool_calls: true,
            show_members_responses: true,
        }
    }
}

/// A built team bound to one user and session.
#[allow(deprecated)]
pub struct Team {
    pub(crate) config: TeamConfig,
    pub(crate) leader: CompletionModelHandle<'static>,
    pub(crate) model_name: String,
    pub(crate) overrides: ModelOverrides,
    pub(crate) members: Vec<Arc<Agent>>,
    pub(crate) system_prompt: String,
    pub(crate) sessions: SessionStore,
    pub(crate) user_id: Option<String>,
    pub(crate) session_id: String,
    pub(crate) settings: LoopSettings,
}

impl Team {
    pub fn id(&self) -> &str {
        &self.config.team_id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn mode(&self) -> TeamMode {
        self.config.mode
    }

    pub fn model(&self) -> &str {
        &self.model_name
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn member_ids(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.id()).collect()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn history(&self) -> Result<Vec<Message>> {
        let runs =
            self.sessions
                .recent_runs(&self.config.team_id, &self.session_id, TEAM_HISTORY_RUNS)?;
        Ok(runs
            .into_iter()
            .flat_map(|r| [user_text(r.message), assistant_text(r.content)])
            .collect())
    }

    fn tool_loop<'a>(&'a self, tools: &'a ToolRegistry) -> ToolLoop<'a> {
        ToolLoop {
            model: &self.leader,
            model_name: &self.model_name,
            tools,
            max_iterations: self.settings.max_iterations,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            overrides: &self.overrides,
            show_tool_calls: self.config.show_tool_calls,
            verbose: self.settings.debug_mode,
        }
    }

    /// Answer `message` with the team's coordination mode and persist the run.
    pub async fn run(
        &self,
        message: &str,
        sink: Option<&mpsc::Sender<RunEvent>>,
    ) -> Result<RunResponse> {
        let run_id = uuid::Uuid::new_v4().to_string();
        info!(
            "Team '{}' run {run_id} ({} mode, session {}, members {:?})",
            self.config.team_id,
            self.config.mode,
            self.session_id,
            self.member_ids()
        );

        let collected: Collected = Arc::new(Mutex::new(Vec::new()));
        let (content, tools_used) = match self.config.mode {
            TeamMode::Route => self.run_route(message, sink, &collected).await?,
            TeamMode::Coordinate => self.run_coordinate(message, sink, &collected).await?,
            TeamMode::Collaborate => self.run_collaborate(message, sink, &collected).await?,
        };

        let member_responses = if self.config.show_members_responses {
            collected.lock().map(|v| v.clone()).unwrap_or_default()
        } else {
            Vec::new()
        };
        let response = RunResponse {
            run_id,
            agent_id: self.config.team_id.clone(),
            session_id: self.session_id.clone(),
            model: self.model_name.clone(),
            content,
            tools_used,
            member_responses,
            created_at: Utc::now(),
        };
        if let Err(e) = self
            .sessions
            .record(&response.to_record(message, self.user_id.as_deref()))
        {
            warn!(
                "Failed to persist run {} of team '{}': {e}",
                response.run_id, self.config.team_id
            );
        }
        Ok(response)
    }

    async fn run_coordinate(
        &self,
        message: &str,
        sink: Option<&mpsc::Sender<RunEvent>>,
        collected: &Collected,
    ) -> Result<(String, Vec<String>)> {
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(TransferTaskTool::new(
            self.members.clone(),
            collected.clone(),
        )));
        let output = self
            .tool_loop(&tools)
            .run(&self.system_prompt, self.history()?, user_text(message), sink)
            .await?;
        Ok((output.content, output.tools_used))
    }

    async fn run_route(
        &self,
        message: &str,
        sink: Option<&mpsc::Sender<RunEvent>>,
        collected: &Collected,
    ) -> Result<(String, Vec<String>)> {
        let (temperature, max_tokens) = self.overrides.resolve(
            &self.model_name,
            self.settings.temperature,
            self.settings.max_tokens,
        );
        let mut messages = self.history()?;
        messages.push(user_text(message));
        let request = CompletionRequest {
            preamble: Some(self.system_prompt.clone()),
            chat_history: OneOrMany::many(messages)
                .unwrap_or_else(|_| OneOrMany::one(user_text(message))),
            documents: Vec::new(),
            tools: vec![forward_definition(&self.members)],
            temperature,
            max_tokens: Some(max_tokens),
            tool_choice: None,
            additional_params: None,
        };
        let response = self
            .leader
            .completion(request)
            .await
            .map_err(|e| anyhow::anyhow!("LLM completion error: {e}"))?;

        let mut leader_text = String::new();
        let mut forward: Option<serde_json::Value> = None;
        for content in response.choice.iter() {
            match content {
                AssistantContent::Text(t) => leader_text.push_str(&t.text),
                AssistantContent::ToolCall(tc) if tc.function.name == FORWARD_TOOL => {
                    forward.get_or_insert_with(|| tc.function.arguments.clone());
                }
                _ => {}
            }
        }

        let target = forward.as_ref().and_then(|args| {
            let id = args.get("member_id").and_then(|v| v.as_str())?;
            self.members.iter().find(|m| m.id() == id)
        });
        let Some(member) = target else {
            if forward.is_some() {
                warn!("Team '{}': leader routed to an unknown member", self.config.team_id);
            }
            emit(sink, RunEvent::Content(leader_text.clone())).await;
            return Ok((leader_text, Vec::new()));
        };

        info!("Team '{}' routing to member '{}'", self.config.team_id, member.id());
        let mut content = String::new();
        if self.config.show_tool_calls {
            let args = forward.unwrap_or(serde_json::Value::Null);
            let block = format!("Running:\n - {}\n\n", format_tool_call(FORWARD_TOOL, &args));
            emit(sink, RunEvent::Content(block.clone())).await;
            content.push_str(&block);
        }
        let answer = member.run(message, sink).await?;
        content.push_str(&answer.content);
        let mut tools_used = vec![FORWARD_TOOL.to_string()];
        tools_used.extend(answer.tools_used.iter().cloned());
        push_response(collected, answer);
        Ok((content, tools_used))
    }

    async fn run_collaborate(
        &self,
        message: &str,
        sink: Option<&mpsc::Sender<RunEvent>>,
        collected: &Collected,
    ) -> Result<(String, Vec<String>)> {
        let results = join_all(self.members.iter().map(|m| m.run(message, None))).await;

        let mut combined = String::new();
        let mut tools_used = Vec::new();
        for (member, result) in self.members.iter().zip(results) {
            let body = match result {
                Ok(r) => {
                    tools_used.extend(r.tools_used.iter().cloned());
                    let body = r.content.clone();
                    push_response(collected, r);
                    body
                }
                Err(e) => {
                    warn!("Member '{}' failed: {e:#}", member.id());
                    format!("(failed: {e})")
                }
            };
            combined.push_str(&format!("### {} ({})\n{}\n\n", member.name(), member.id(), body));
        }

        let prompt = format!(
            "{message}\n\n<member_responses>\n{}</member_responses>\n\n\
             Combine the member responses above into one complete answer to the original request.",
            combined
        );
        let no_tools = ToolRegistry::new();
        let output = self
            .tool_loop(&no_tools)
            .run(&self.system_prompt, self.history()?, user_text(prompt), sink)
            .await?;
        tools_used.extend(output.tools_used);
        Ok((output.content, tools_used))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::agent::RunOptions;
    use crate::registry::{Catalog, Runtime, TeamRegistration};
    use crate::testing::{persona, FakeLlm, Reply};

    fn team(runtime: Runtime, mode: TeamMode) -> Team {
        let config = TeamConfig {
            team_id: "desk".into(),
            name: "News Desk".into(),
            mode,
            members: vec!["alpha".into(), "beta".into()],
            ..Default::default()
        };
        let catalog = Catalog::discover(
            runtime,
            crate::tools::builtin(),
            vec![persona("alpha", |_| {}), persona("beta", |_| {})],
            vec![TeamRegistration::new(config, build_team)],
        );
        catalog.get_team("desk", &RunOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn route_returns_the_chosen_members_answer() {
        let llm = FakeLlm::start(vec![
            Reply::call(FORWARD_TOOL, json!({"member_id": "beta"})),
            Reply::text("beta answer"),
        ])
        .await;
        let team = team(llm.runtime(), TeamMode::Route);

        let response = team.run("what is new?", None).await.unwrap();
        assert_eq!(
            response.content,
            "Running:\n - forward_task_to_member(member_id=beta)\n\nbeta answer"
        );
        assert_eq!(response.tools_used, vec![FORWARD_TOOL]);
        assert_eq!(response.member_responses.len(), 1);
        assert_eq!(response.member_responses[0].agent_id, "beta");
        assert_eq!(response.member_responses[0].session_id, team.session_id());

        let requests = llm.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0]["tools"][0]["function"]["name"], FORWARD_TOOL);

        let runs = team.sessions.recent_runs("desk", team.session_id(), 5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].content, response.content);
    }

    #[tokio::test]
    async fn route_without_a_member_uses_the_leaders_text() {
        let llm = FakeLlm::start(vec![Reply::text("Hi! Ask me about the news.")]).await;
        let team = team(llm.runtime(), TeamMode::Route);

        let (tx, mut rx) = mpsc::channel(8);
        let response = team.run("hello", Some(&tx)).await.unwrap();
        drop(tx);
        assert_eq!(response.content, "Hi! Ask me about the news.");
        assert!(response.tools_used.is_empty());
        assert!(response.member_responses.is_empty());
        assert_eq!(
            rx.recv().await,
            Some(RunEvent::Content("Hi! Ask me about the news.".into()))
        );
        assert_eq!(llm.requests().len(), 1);
    }

    #[tokio::test]
    async fn coordinate_delegates_then_answers() {
        let llm = FakeLlm::start(vec![
            Reply::call(
                members::TRANSFER_TOOL,
                json!({"member_id": "alpha", "task_description": "Find stories"}),
            ),
            Reply::text("alpha found 3 stories"),
            Reply::text("Summary: 3 stories"),
        ])
        .await;
        let team = team(llm.runtime(), TeamMode::Coordinate);

        let response = team.run("summarize the news", None).await.unwrap();
        assert_eq!(
            response.content,
            "Running:\n - transfer_task_to_member(member_id=alpha, task_description=Find stories)\n\nSummary: 3 stories"
        );
        assert_eq!(response.tools_used, vec![members::TRANSFER_TOOL]);
        assert_eq!(response.member_responses.len(), 1);
        assert_eq!(response.member_responses[0].content, "alpha found 3 stories");

        let requests = llm.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[1]["messages"].to_string().contains("Find stories"));
        assert!(requests[2]["messages"].to_string().contains("alpha found 3 stories"));
    }

    #[tokio::test]
    async fn collaborate_combines_every_member() {
        let llm = FakeLlm::start(vec![
            Reply::text("member view"),
            Reply::text("member view"),
            Reply::text("combined answer"),
        ])
        .await;
        let team = team(llm.runtime(), TeamMode::Collaborate);

        let response = team.run("what matters today?", None).await.unwrap();
        assert_eq!(response.content, "combined answer");
        let ids: Vec<&str> = response
            .member_responses
            .iter()
            .map(|r| r.agent_id.as_str())
            .collect();
        assert_eq!(ids, vec!["alpha", "beta"]);

        let requests = llm.requests();
        assert_eq!(requests.len(), 3);
        let leader = requests[2]["messages"].to_string();
        assert!(leader.contains("<member_responses>"));
        assert!(leader.contains("### ALPHA (alpha)"));
        assert!(leader.contains("### BETA (beta)"));
    }

    #[test]
    fn mode_parsing_and_display() {
        assert_eq!("Coordinate".parse::<TeamMode>().unwrap(), TeamMode::Coordinate);
        assert_eq!(" route ".parse::<TeamMode>().unwrap(), TeamMode::Route);
        assert!("vote".parse::<TeamMode>().is_err());
        assert_eq!(TeamMode::Collaborate.to_string(), "collaborate");
        assert_eq!(
            serde_json::to_string(&TeamMode::Route).unwrap(),
            "\"route\""
        );
    }
}
