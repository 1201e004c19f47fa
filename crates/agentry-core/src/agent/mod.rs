pub mod builder;
pub mod config;
pub mod r#loop;

use anyhow::Result;
use chrono::{DateTime, Utc};
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::completion::Message;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub use builder::{build_agent, system_prompt, AgentBuilder};
pub use config::{AgentConfig, RunOptions};
pub use r#loop::{LoopOutput, ToolLoop};

use crate::model::ModelOverrides;
use crate::storage::{RunRecord, SessionStore};
use crate::tools::ToolRegistry;
use r#loop::{assistant_text, user_text};

/// Progress reported while a run is in flight.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// A piece of the answer, in order.
    Content(String),
    ToolCall {
        name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        name: String,
        preview: String,
    },
}

/// Outcome of a finished agent or team run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResponse {
    pub run_id: String,
    /// Agent id, or team id for team runs.
    pub agent_id: String,
    pub session_id: String,
    pub model: String,
    pub content: String,
    pub tools_used: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub member_responses: Vec<RunResponse>,
    pub created_at: DateTime<Utc>,
}

impl RunResponse {
    pub(crate) fn to_record(&self, message: &str, user_id: Option<&str>) -> RunRecord {
        RunRecord {
            run_id: self.run_id.clone(),
            session_id: self.session_id.clone(),
            agent_id: self.agent_id.clone(),
            user_id: user_id.map(str::to_string),
            message: message.to_string(),
            content: self.content.clone(),
            tools_used: self.tools_used.clone(),
            created_at: self.created_at,
        }
    }
}

/// Sampling and iteration limits for one built agent.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub max_iterations: usize,
    pub temperature: Option<f64>,
    pub max_tokens: u64,
    pub debug_mode: bool,
}

/// A built agent bound to one user and session.
#[allow(deprecated)]
pub struct Agent {
    pub(crate) config: AgentConfig,
    pub(crate) model: CompletionModelHandle<'static>,
    pub(crate) model_name: String,
    pub(crate) overrides: ModelOverrides,
    pub(crate) tools: ToolRegistry,
    pub(crate) system_prompt: String,
    pub(crate) sessions: SessionStore,
    pub(crate) user_id: Option<String>,
    pub(crate) session_id: String,
    pub(crate) settings: LoopSettings,
}

impl Agent {
    pub fn id(&self) -> &str {
        &self.config.agent_id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn model(&self) -> &str {
        &self.model_name
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.names()
    }

    /// Previous turns of this agent's session, oldest first.
    fn history(&self) -> Result<Vec<Message>> {
        let runs = self.sessions.recent_runs(
            &self.config.agent_id,
            &self.session_id,
            self.config.history_runs,
        )?;
        Ok(runs
            .into_iter()
            .flat_map(|r| [user_text(r.message), assistant_text(r.content)])
            .collect())
    }

    /// Answer `message`, streaming content to `sink` when given, and persist the run.
    pub async fn run(
        &self,
        message: &str,
        sink: Option<&mpsc::Sender<RunEvent>>,
    ) -> Result<RunResponse> {
        let run_id = uuid::Uuid::new_v4().to_string();
        info!(
            "Agent '{}' run {run_id} (session {}, model {})",
            self.config.agent_id, self.session_id, self.model_name
        );

        let history = self.history()?;
        let tool_loop = ToolLoop {
            model: &self.model,
            model_name: &self.model_name,
            tools: &self.tools,
            max_iterations: self.settings.max_iterations,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            overrides: &self.overrides,
            show_tool_calls: self.config.show_tool_calls,
            verbose: self.settings.debug_mode,
        };
        let output = tool_loop
            .run(&self.system_prompt, history, user_text(message), sink)
            .await?;

        let response = RunResponse {
            run_id,
            agent_id: self.config.agent_id.clone(),
            session_id: self.session_id.clone(),
            model: self.model_name.clone(),
            content: output.content,
            tools_used: output.tools_used,
            member_responses: Vec::new(),
            created_at: Utc::now(),
        };
        if let Err(e) = self
            .sessions
            .record(&response.to_record(message, self.user_id.as_deref()))
        {
            warn!(
                "Failed to persist run {} of agent '{}': {e}",
                response.run_id, self.config.agent_id
            );
        }
        info!(
            "Agent '{}' run {} finished ({} chars, tools: {:?})",
            self.config.agent_id,
            response.run_id,
            response.content.len(),
            response.tools_used
        );
        Ok(response)
    }
}
