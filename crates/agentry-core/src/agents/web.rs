use crate::agent::AgentConfig;
use crate::tools::duckduckgo;

pub fn config() -> AgentConfig {
    AgentConfig {
        agent_id: "web_agent".into(),
        name: "Web Search Agent".into(),
        description: include_str!("../../prompts/web_agent/description.md").into(),
        instructions: include_str!("../../prompts/web_agent/instructions.md").into(),
        toolsets: vec![duckduckgo::CONFIG.tool_id.into()],
        ..Default::default()
    }
}
