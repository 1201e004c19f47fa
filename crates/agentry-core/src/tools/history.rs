use anyhow::Result;
use async_trait::async_trait;

use super::{int_param, Tool};
use crate::storage::SessionStore;

/// Reads earlier turns of the current session.
pub struct ChatHistoryTool {
    sessions: SessionStore,
    agent_id: String,
    session_id: String,
}

impl ChatHistoryTool {
    pub fn new(sessions: SessionStore, agent_id: &str, session_id: &str) -> Self {
        Self {
            sessions,
            agent_id: agent_id.to_string(),
            session_id: session_id.to_string(),
        }
    }
}

#[async_trait]
impl Tool for ChatHistoryTool {
    fn name(&self) -> &str {
        "get_chat_history"
    }

    fn description(&self) -> &str {
        "Get the chat history of this session as a JSON list of {role, content} messages, oldest first."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "num_chats": {
                    "type": "integer",
                    "description": "Number of previous exchanges to return (default 10)",
                    "minimum": 1,
                    "maximum": 100
                }
            }
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let n = int_param(&params, "num_chats", 10, 1, 100) as usize;
        let runs = self.sessions
            .recent_runs(&self.agent_id, &self.session_id, n)?;
        let messages: Vec<serde_json::Value> = runs
            .iter()
            .flat_map(|r| {
                [
                    serde_json::json!({"role": "user", "content": r.message}),
                    serde_json::json!({"role": "assistant", "content": r.content}),
                ]
            })
            .collect();
        Ok(serde_json::to_string(&messages)?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::{Database, RunRecord};

    #[tokio::test]
    async fn lists_session_turns() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let sessions = SessionStore::new(db, "agent_sessions").unwrap();
        sessions
            .record(&RunRecord {
                run_id: "r1".into(),
                session_id: "s1".into(),
                agent_id: "web_agent".into(),
                user_id: None,
                message: "hello".into(),
                content: "hi there".into(),
                tools_used: Vec::new(),
                created_at: chrono::Utc::now(),
            })
            .unwrap();

        let tool = ChatHistoryTool::new(sessions.clone(), "web_agent", "s1");
        let out = tool.execute(serde_json::json!({})).await.unwrap();
        let msgs: Vec<serde_json::Value> = serde_json::from_str(&out).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1]["content"], "hi there");

        let other = ChatHistoryTool::new(sessions, "web_agent", "s2");
        assert_eq!(other.execute(serde_json::json!({})).await.unwrap(), "[]");
    }
}
