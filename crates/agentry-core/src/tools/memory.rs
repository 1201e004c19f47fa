use anyhow::Result;
use async_trait::async_trait;

use super::{str_param, Tool};
use crate::storage::MemoryStore;

/// Memory tools for one user. Deletion tools are only handed out when the agent allows them.
pub fn user_memory_tools(
    store: MemoryStore,
    user_id: &str,
    allow_delete: bool,
    allow_clear: bool,
) -> Vec<Box<dyn Tool>> {
    let mut tools: Vec<Box<dyn Tool>> = vec![Box::new(MemoryTool {
        store: store.clone(),
        user_id: user_id.to_string(),
        op: MemoryOp::Add,
    })];
    if allow_delete {
        tools.push(Box::new(MemoryTool {
            store: store.clone(),
            user_id: user_id.to_string(),
            op: MemoryOp::Delete,
        }));
    }
    if allow_clear {
        tools.push(Box::new(MemoryTool {
            store,
            user_id: user_id.to_string(),
            op: MemoryOp::Clear,
        }));
    }
    tools
}

#[derive(Clone, Copy)]
enum MemoryOp {
    Add,
    Delete,
    Clear,
}

struct MemoryTool {
    store: MemoryStore,
    user_id: String,
    op: MemoryOp,
}

#[async_trait]
impl Tool for MemoryTool {
    fn name(&self) -> &str {
        match self.op {
            MemoryOp::Add => "update_user_memory",
            MemoryOp::Delete => "delete_user_memory",
            MemoryOp::Clear => "clear_user_memories",
        }
    }

    fn description(&self) -> &str {
        match self.op {
            MemoryOp::Add => {
                "Remember a durable fact or preference about the user (one short sentence)."
            }
            MemoryOp::Delete => "Forget one stored memory about the user by its memory_id.",
            MemoryOp::Clear => "Forget everything stored about the user.",
        }
    }

    fn parameters_schema(&self) -> serde_json::Value {
        match self.op {
            MemoryOp::Add => serde_json::json!({
                "type": "object",
                "properties": {
                    "memory": {"type": "string", "description": "The fact to remember", "minLength": 1, "maxLength": 500}
                },
                "required": ["memory"]
            }),
            MemoryOp::Delete => serde_json::json!({
                "type": "object",
                "properties": {
                    "memory_id": {"type": "string", "description": "ID of the memory to delete"}
                },
                "required": ["memory_id"]
            }),
            MemoryOp::Clear => serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        match self.op {
            MemoryOp::Add => {
                let memory = str_param(&params, "memory");
                if memory.is_empty() {
                    return Ok("Error: memory is required".into());
                }
                let entry = self.store.add(&self.user_id, memory)?;
                Ok(format!("Memory saved (id {})", entry.memory_id))
            }
            MemoryOp::Delete => {
                let id = str_param(&params, "memory_id");
                if self.store.delete(&self.user_id, id)? {
                    Ok(format!("Memory {id} deleted"))
                } else {
                    Ok(format!("Error: no memory with id '{id}'"))
                }
            }
            MemoryOp::Clear => {
                let n = self.store.clear(&self.user_id)?;
                Ok(format!("Cleared {n} memories"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::Database;

    fn store() -> MemoryStore {
        MemoryStore::new(Arc::new(Database::open_in_memory().unwrap())).unwrap()
    }

    #[test]
    fn deletion_tools_are_opt_in() {
        let names = |tools: Vec<Box<dyn Tool>>| -> Vec<String> {
            tools.iter().map(|t| t.name().to_string()).collect()
        };
        assert_eq!(
            names(user_memory_tools(store(), "ada", false, false)),
            vec!["update_user_memory"]
        );
        assert_eq!(
            names(user_memory_tools(store(), "ada", true, true)),
            vec!["update_user_memory", "delete_user_memory", "clear_user_memories"]
        );
    }

    #[tokio::test]
    async fn add_delete_clear() {
        let store = store();
        let tools = user_memory_tools(store.clone(), "ada", true, true);

        tools[0]
            .execute(serde_json::json!({"memory": "Reads HN every morning"}))
            .await
            .unwrap();
        let saved = store.list("ada").unwrap();
        assert_eq!(saved.len(), 1);

        let out = tools[1]
            .execute(serde_json::json!({"memory_id": saved[0].memory_id}))
            .await
            .unwrap();
        assert!(out.ends_with("deleted"));

        store.add("ada", "a").unwrap();
        store.add("ada", "b").unwrap();
        let out = tools[2].execute(serde_json::json!({})).await.unwrap();
        assert_eq!(out, "Cleared 2 memories");
    }
}
