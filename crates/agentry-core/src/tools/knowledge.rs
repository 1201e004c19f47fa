use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::{int_param, str_param, Tool};
use crate::knowledge::KnowledgeBase;

/// Lets an agent query its own knowledge base.
pub struct SearchKnowledgeTool {
    knowledge: Arc<KnowledgeBase>,
}

impl SearchKnowledgeTool {
    pub fn new(knowledge: Arc<KnowledgeBase>) -> Self {
        Self { knowledge }
    }
}

#[async_trait]
impl Tool for SearchKnowledgeTool {
    fn name(&self) -> &str {
        "search_knowledge_base"
    }

    fn description(&self) -> &str {
        "Search the knowledge base for information relevant to a query. Use this before answering questions the knowledge base covers."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search terms"},
                "limit": {"type": "integer", "description": "Max results (default 5)", "minimum": 1, "maximum": 20}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let query = str_param(&params, "query");
        if query.is_empty() {
            return Ok("Error: query is required".into());
        }
        let limit = int_param(&params, "limit", 5, 1, 20) as usize;
        let hits = self.knowledge.search(query, limit)?;
        if hits.is_empty() {
            return Ok(format!("No documents found for: {query}"));
        }
        let docs: Vec<serde_json::Value> = hits
            .iter()
            .map(|h| {
                serde_json::json!({
                    "source": format!("{}#L{}-L{}", h.source, h.start_line, h.end_line),
                    "content": h.content,
                })
            })
            .collect();
        Ok(serde_json::to_string(&docs)?)
    }
}
