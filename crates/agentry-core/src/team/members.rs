use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use rig::completion::ToolDefinition;
use tracing::{info, warn};

use crate::agent::{Agent, RunResponse};
use crate::tools::{str_param, Tool};

pub(crate) const TRANSFER_TOOL: &str = "transfer_task_to_member";
pub(crate) const FORWARD_TOOL: &str = "forward_task_to_member";

/// Member responses gathered during one team run.
pub(crate) type Collected = Arc<Mutex<Vec<RunResponse>>>;

pub(crate) fn push_response(collected: &Collected, response: RunResponse) {
    match collected.lock() {
        Ok(mut v) => v.push(response),
        Err(e) => warn!("Member response collector poisoned: {e}"),
    }
}

fn member_ids(members: &[Arc<Agent>]) -> Vec<String> {
    members.iter().map(|m| m.id().to_string()).collect()
}

/// Schema of the route-mode tool. Route mode reads the call instead of executing it.
pub(crate) fn forward_definition(members: &[Arc<Agent>]) -> ToolDefinition {
    ToolDefinition {
        name: FORWARD_TOOL.into(),
        description: "Forward the user's message to the single team member best suited to answer it. The member's answer is returned to the user as-is.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "member_id": {
                    "type": "string",
                    "enum": member_ids(members),
                    "description": "ID of the member to forward the task to"
                },
                "expected_output": {
                    "type": "string",
                    "description": "What a good answer looks like"
                }
            },
            "required": ["member_id"]
        }),
    }
}

/// Coordinate-mode tool: the leader delegates a sub-task and gets the member's answer back.
pub(crate) struct TransferTaskTool {
    members: Vec<Arc<Agent>>,
    collected: Collected,
}

impl TransferTaskTool {
    pub(crate) fn new(members: Vec<Arc<Agent>>, collected: Collected) -> Self {
        Self { members, collected }
    }
}

#[async_trait]
impl Tool for TransferTaskTool {
    fn name(&self) -> &str {
        TRANSFER_TOOL
    }

    fn description(&self) -> &str {
        "Transfer a task to a team member. Describe the task clearly and say what output you expect. The member's answer is returned to you."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "member_id": {
                    "type": "string",
                    "enum": member_ids(&self.members),
                    "description": "ID of the member to transfer the task to"
                },
                "task_description": {
                    "type": "string",
                    "description": "A clear description of the task",
                    "minLength": 1
                },
                "expected_output": {
                    "type": "string",
                    "description": "The expected output"
                }
            },
            "required": ["member_id", "task_description"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let member_id = str_param(&params, "member_id");
        let Some(member) = self.members.iter().find(|m| m.id() == member_id) else {
            return Ok(format!(
                "Error: unknown member '{member_id}'. Members: {:?}",
                member_ids(&self.members)
            ));
        };
        let mut task = str_param(&params, "task_description").to_string();
        let expected = str_param(&params, "expected_output");
        if !expected.is_empty() {
            task.push_str(&format!("\n\n<expected_output>\n{expected}\n</expected_output>"));
        }

        info!("Transferring task to member '{member_id}'");
        match member.run(&task, None).await {
            Ok(response) => {
                let content = response.content.clone();
                push_response(&self.collected, response);
                Ok(content)
            }
            Err(e) => Ok(format!("Error: member '{member_id}' failed: {e:#}")),
        }
    }
}
