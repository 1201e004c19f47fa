use crate::agent::AgentConfig;
use crate::knowledge::KnowledgeSpec;
use crate::tools::duckduckgo;

pub fn config() -> AgentConfig {
    AgentConfig {
        agent_id: "agno_assist".into(),
        name: "Agno Assist".into(),
        description: include_str!("../../prompts/agno_assist/description.md").into(),
        instructions: include_str!("../../prompts/agno_assist/instructions.md").into(),
        toolsets: vec![duckduckgo::CONFIG.tool_id.into()],
        knowledge: Some(KnowledgeSpec {
            urls: vec!["https://docs.agno.com/llms-full.txt".into()],
            table_name: "agno_assist_knowledge".into(),
        }),
        search_knowledge: true,
        table_prefix: "agno_assist_".into(),
        ..Default::default()
    }
}
